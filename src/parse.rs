// ===============================
// src/parse.rs (inventory text -> InventoryLine)
// ===============================
//
// Dua format input yang didukung:
// 1) Satu item per baris: "Xanax x5", "Kitchen Knife (equipped)".
// 2) Blok listing marketplace:
//        Xanax
//        $830,000
//        RRP
//        x5
//        Make my listing of Xanax
//    Baris status ("Equipped", "Untradable") menandai item yang sedang dibaca.
// 3) Paste inventory klasik, satu baris panjang yang dipisah tombol aksi:
//        "Kitchen Knife x2Unequip this ItemTrash this ItemBox x3Open this Item"
//    Fragmen aksi dipecah jadi baris baru; "Unequip" berarti item sedang dipakai.
//
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;

use crate::domain::InventoryLine;

static QTY_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bx(\d+)\b").unwrap());
static QTY_LINE_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^x\s*(\d+)$").unwrap());
static PRICE_LINE_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\s*\d[\d,.]*$").unwrap());
static FLOAT_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\.\d+\b").unwrap());
static LOWER_UPPER_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static COLOR_PREFIX_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(yellow|orange)[\s\-_]+(.+)$").unwrap());
static HYPHEN_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+([[:alnum:]])").unwrap());
static ACTION_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(unequip|equip|send|take|trash|donate|open|use|turn\s+on)\s+this\s+item|return\s+to\s+faction")
        .unwrap()
});
static MARKER_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\(\[]\s*(equipped|untradable|untradeable)\s*[\)\]]").unwrap());

/// Column labels and other UI chrome that never names an item.
const CHROME: &[&str] = &["rrp", "qty", "price", "n/a", "name", "item", "items", "quantity", "amount", "value"];

#[derive(Debug, Default)]
struct Block {
    raw: String,
    qty_line: Option<String>,
    equipped: bool,
    untradable: bool,
}

impl Block {
    fn new(raw: &str) -> Self {
        let mut b = Block { raw: raw.to_string(), ..Default::default() };
        for cap in MARKER_RX.captures_iter(raw) {
            match cap[1].to_ascii_lowercase().as_str() {
                "equipped" => b.equipped = true,
                _ => b.untradable = true,
            }
        }
        b
    }

    fn finish(self) -> InventoryLine {
        let base = MARKER_RX.replace_all(&self.raw, " ");
        let inline_qty = QTY_RX.captures(&base).map(|c| c[1].to_string());
        let from_qty_line = self.qty_line.is_some();
        let parsed_quantity = self
            .qty_line
            .or(inline_qty)
            .and_then(|q| q.parse::<u64>().ok())
            .unwrap_or(1);
        let raw_text = if from_qty_line {
            format!("{} x{}", self.raw, parsed_quantity)
        } else {
            self.raw.clone()
        };
        InventoryLine {
            raw_text,
            name: clean_name(&base),
            parsed_quantity,
            is_equipped: self.equipped,
            is_tradable: !self.untradable,
        }
    }
}

fn is_chrome(low: &str) -> bool {
    CHROME.contains(&low) || low.starts_with("make my listing of")
}

/// Classic inventory paste: action buttons glued between item names.
fn split_action_fragments(raw_text: &str) -> Cow<'_, str> {
    if !ACTION_RX.is_match(raw_text) {
        return Cow::Borrowed(raw_text);
    }
    let split = LOWER_UPPER_RX.replace_all(raw_text, "$1 $2");
    let lines = ACTION_RX.replace_all(&split, |c: &Captures| {
        match c.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(verb) if verb == "unequip" => "\nEquipped\n",
            _ => "\n",
        }
    });
    Cow::Owned(lines.into_owned())
}

/// Parse raw pasted text into inventory lines, status flags included.
pub fn parse_inventory(raw_text: &str) -> Vec<InventoryLine> {
    let mut out = Vec::new();
    let mut current: Option<Block> = None;
    let text = split_action_fragments(raw_text);

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        let low = line.to_ascii_lowercase();

        match low.as_str() {
            "equipped" => {
                if let Some(b) = current.as_mut() { b.equipped = true; }
                continue;
            }
            "untradable" | "untradeable" => {
                if let Some(b) = current.as_mut() { b.untradable = true; }
                continue;
            }
            _ => {}
        }

        // Baris aksi menutup blok item
        if low.starts_with("make my listing of") {
            if let Some(b) = current.take() { out.push(b.finish()); }
            continue;
        }
        if is_chrome(&low) || PRICE_LINE_RX.is_match(&line.replace(' ', "")) {
            continue;
        }
        if let Some(cap) = QTY_LINE_RX.captures(&low) {
            if let Some(b) = current.as_mut() {
                b.qty_line = Some(cap[1].to_string());
                continue;
            }
        }

        if let Some(b) = current.replace(Block::new(line)) {
            out.push(b.finish());
        }
    }
    if let Some(b) = current { out.push(b.finish()); }
    out
}

fn unescape_html(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Strip quantity / number noise and rarity prefix, keep a usable item name.
pub fn clean_name(text: &str) -> String {
    let s = unescape_html(text.trim());
    let s = match COLOR_PREFIX_RX.captures(&s) {
        Some(c) if !c[2].trim().is_empty() => c[2].trim().to_string(),
        _ => s,
    };
    let s = QTY_RX.replace_all(&s, " ");
    let s = FLOAT_RX.replace_all(&s, " ");
    let s = LOWER_UPPER_RX.replace_all(&s, "$1 $2");
    let s = HYPHEN_RX.replace_all(&s, " $1");

    let tokens: Vec<&str> = s.split_whitespace().collect();
    let last = tokens.len().saturating_sub(1);
    let kept: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|(i, t)| !(*i > 0 && *i < last && t.chars().all(|c| c.is_ascii_digit())))
        .map(|(_, t)| *t)
        .collect();
    kept.join(" ").trim_matches(|c: char| c == ':' || c == '_' || c.is_whitespace()).to_string()
}
