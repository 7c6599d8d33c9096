use crate::models::Locale;
use serde::Serialize;

/// Display classification for a rejection reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionClass {
    pub icon: &'static str,
    pub color: &'static str,
    pub label: String,
}

struct ReasonPattern {
    needle: &'static str,
    icon: &'static str,
    color: &'static str,
    label_zh: &'static str,
    label_en: &'static str,
}

// Checked in order; upstream reasons may carry extra context after the known phrase.
const REASON_PATTERNS: &[ReasonPattern] = &[
    ReasonPattern {
        needle: "名額已滿",
        icon: "users",
        color: "text-orange-600",
        label_zh: "名額已滿",
        label_en: "Quota full",
    },
    ReasonPattern {
        needle: "quota full",
        icon: "users",
        color: "text-orange-600",
        label_zh: "名額已滿",
        label_en: "Quota full",
    },
    ReasonPattern {
        needle: "已獲分配",
        icon: "check-square",
        color: "text-blue-600",
        label_zh: "已獲其他子類別分配",
        label_en: "Allocated elsewhere",
    },
    ReasonPattern {
        needle: "already allocated",
        icon: "check-square",
        color: "text-blue-600",
        label_zh: "已獲其他子類別分配",
        label_en: "Allocated elsewhere",
    },
    ReasonPattern {
        needle: "不符合資格",
        icon: "user-x",
        color: "text-red-600",
        label_zh: "不符合申請資格",
        label_en: "Not eligible",
    },
    ReasonPattern {
        needle: "不符資格",
        icon: "user-x",
        color: "text-red-600",
        label_zh: "不符合申請資格",
        label_en: "Not eligible",
    },
    ReasonPattern {
        needle: "not eligible",
        icon: "user-x",
        color: "text-red-600",
        label_zh: "不符合申請資格",
        label_en: "Not eligible",
    },
    ReasonPattern {
        needle: "無可分配子類別",
        icon: "layers",
        color: "text-slate-600",
        label_zh: "無可分配子類別",
        label_en: "No eligible sub-type",
    },
    ReasonPattern {
        needle: "no eligible sub",
        icon: "layers",
        color: "text-slate-600",
        label_zh: "無可分配子類別",
        label_en: "No eligible sub-type",
    },
    ReasonPattern {
        needle: "資料不全",
        icon: "file-warning",
        color: "text-amber-600",
        label_zh: "資料不全",
        label_en: "Incomplete documents",
    },
    ReasonPattern {
        needle: "incomplete",
        icon: "file-warning",
        color: "text-amber-600",
        label_zh: "資料不全",
        label_en: "Incomplete documents",
    },
    ReasonPattern {
        needle: "未排名",
        icon: "list-x",
        color: "text-gray-600",
        label_zh: "未列入排名",
        label_en: "Not ranked",
    },
    ReasonPattern {
        needle: "not ranked",
        icon: "list-x",
        color: "text-gray-600",
        label_zh: "未列入排名",
        label_en: "Not ranked",
    },
];

const FALLBACK_ICON: &str = "alert-circle";
const FALLBACK_COLOR: &str = "text-gray-500";

/// Map a raw rejection reason to its taxonomy entry, falling back to the raw text.
pub fn classify_rejection(reason: &str, locale: Locale) -> RejectionClass {
    let lowered = reason.to_lowercase();

    REASON_PATTERNS
        .iter()
        .find(|pattern| lowered.contains(pattern.needle))
        .map(|pattern| RejectionClass {
            icon: pattern.icon,
            color: pattern.color,
            label: locale.pick(pattern.label_zh, pattern.label_en).to_string(),
        })
        .unwrap_or_else(|| RejectionClass {
            icon: FALLBACK_ICON,
            color: FALLBACK_COLOR,
            label: reason.to_string(),
        })
}
