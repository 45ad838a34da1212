//! Benefit extraction from the provider's markdown-ish tool output.
//!
//! The provider answers with human-oriented text: bullet lists, `## ` headings,
//! `优惠券标题：` key/value lines, coupon codes and expiry dates in a handful of
//! formats. Parsing is line based and tolerant; unknown lines are skipped.

use chrono::{Datelike, NaiveDate};
use couponclaw_core::types::Benefit;
use regex::Regex;
use std::sync::LazyLock;

static FULL_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("valid regex"));
static CN_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})月\s*(\d{1,2})日").expect("valid regex"));
static VALID_UNTIL_MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"有效期(?:至|到|为|截止)?[^\d]*(\d{1,2})[-/](\d{1,2})").expect("valid regex")
});
static CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(couponCode|couponId|券码|券号|兑换码)\s*[:：]\s*([A-Za-z0-9\-]{3,})").expect("valid regex")
});
static NAME_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:优惠券标题|优惠券名称|优惠名称|商品名称|标题|名称|券名|title|name)\s*[:：]\s*(.+)$")
        .expect("valid regex")
});
static VALIDITY_NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[(（][^)）]*有效[^)）]*[)）]").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+•]\s+|\d{1,3}[.、)]\s*)").expect("valid regex"));

const META_LABELS: [&str; 12] = [
    "有效期", "状态", "券码", "券号", "使用规则", "图片", "链接", "价格", "coupon", "code", "http", "<img",
];
const SECTION_WORDS: [&str; 5] = ["列表", "领券结果", "当前时间", "我的优惠券", "可领"];
const NONE_MARKERS: [&str; 4] = ["无可领取", "暂无", "没有可领", "no coupons"];

/// Strip markdown emphasis, code ticks and escapes.
pub fn clean_markdown(text: &str) -> String {
    text.replace("**", "")
        .replace("__", "")
        .replace(['*', '`', '\\'], "")
        .trim()
        .to_string()
}

/// True if the text states there is nothing to claim.
pub fn says_none_available(text: &str) -> bool {
    let lower = text.to_lowercase();
    NONE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Extract an expiry date from one line. Dates without a year resolve to the
/// next occurrence on or after `today`.
pub fn parse_expiry(line: &str, today: NaiveDate) -> Option<NaiveDate> {
    // Ranges ("2026-01-01 至 2026-01-31") end on the last date.
    if let Some(date) = FULL_DATE
        .captures_iter(line)
        .filter_map(|c| ymd(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?))
        .last()
    {
        return Some(date);
    }
    if let Some(c) = CN_MONTH_DAY.captures_iter(line).last() {
        return month_day(&c[1], &c[2], today);
    }
    let c = VALID_UNTIL_MONTH_DAY.captures(line)?;
    month_day(&c[1], &c[2], today)
}

fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

fn month_day(m: &str, d: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (m, d): (u32, u32) = (m.parse().ok()?, d.parse().ok()?);
    let this_year = ymd(today.year(), m, d)?;
    if this_year < today {
        ymd(today.year() + 1, m, d)
    } else {
        Some(this_year)
    }
}

fn normalize_name(raw: &str) -> String {
    let cleaned = clean_markdown(raw);
    let cleaned = VALIDITY_NOTE.replace_all(&cleaned, "");
    let cleaned = cleaned.split("有效期").next().unwrap_or_default();
    let cleaned = cleaned.trim_start_matches(['-', '•', '*', ' ']);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_metadata(text: &str) -> bool {
    let lower = text.to_lowercase();
    META_LABELS.iter().any(|kw| lower.contains(kw))
}

/// Benefit name carried by this line, if it starts a new entry.
fn extract_name(line: &str) -> Option<String> {
    let clean = clean_markdown(line);

    if let Some(heading) = line.trim_start().strip_prefix("##") {
        let name = normalize_name(heading.trim_start_matches('#'));
        if SECTION_WORDS.iter().any(|w| name.contains(w)) || is_metadata(&name) {
            return None;
        }
        return Some(name).filter(|n| !n.is_empty());
    }

    let body = match LIST_MARKER.find(line.trim_start()) {
        Some(m) => line.trim_start()[m.end()..].trim(),
        None => clean.as_str(),
    };
    let body = clean_markdown(body);

    if let Some(c) = NAME_FIELD.captures(&body) {
        let name = normalize_name(&c[1]);
        return Some(name).filter(|n| !n.is_empty() && !is_metadata(n));
    }

    let is_list_item = LIST_MARKER.is_match(line.trim_start());
    let has_colon = body.contains(':') || body.contains('：');
    if is_list_item && !has_colon && !is_metadata(&body) && FULL_DATE.find(&body).is_none() {
        let name = normalize_name(&body);
        if !name.is_empty() && name.chars().count() <= 80 {
            return Some(name);
        }
    }
    None
}

fn is_noise(line: &str) -> bool {
    line.contains("Client 支持 Markdown")
        || line.starts_with("### 当前时间")
        || line.starts_with("当前时间")
}

fn is_separator(line: &str) -> bool {
    line.is_empty() || line.starts_with("---") || line.starts_with('━')
}

/// Parse a tool's text output into benefits.
pub fn parse_benefits(text: &str, today: NaiveDate) -> Vec<Benefit> {
    let mut benefits = Vec::new();
    let mut current: Option<Benefit> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if is_separator(line) {
            benefits.extend(current.take());
            continue;
        }
        if is_noise(line) {
            continue;
        }

        if let Some(c) = CODE.captures(line) {
            if let Some(b) = current.as_mut() {
                let is_code = !c[1].eq_ignore_ascii_case("couponId");
                if is_code || b.id.is_none() {
                    b.id = Some(c[2].to_string());
                }
            }
            continue;
        }

        if let Some(name) = extract_name(raw) {
            benefits.extend(current.take());
            let mut benefit = Benefit::named(name);
            benefit.expires_on = parse_expiry(line, today);
            current = Some(benefit);
            continue;
        }

        if let Some(date) = parse_expiry(line, today)
            && let Some(b) = current.as_mut()
        {
            b.expires_on = Some(date);
        }
    }
    benefits.extend(current);
    benefits
}
