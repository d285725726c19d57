// ===============================
// src/matching.rs (MatchResolver)
// ===============================
//
// Fungsi murni: (teks, dictionary) -> (id, skor). Tidak ada I/O di sini.
//
// Skor token-set (0..=100):
//   ta, tb  = himpunan token (urut) dari kedua nama
//   sect    = irisan, diff_a / diff_b = sisa masing-masing
//   skor    = max( ratio(sorted(ta), sorted(tb)),
//                  ratio(sect + diff_a, sect + diff_b),
//                  ratio(sect, sect + diff_a),      // hanya jika sect tidak kosong
//                  ratio(sect, sect + diff_b) )
// ratio() memakai normalized Levenshtein dari strsim.
//
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::dictionary::{DictEntry, Dictionary};
use crate::domain::{InventoryLine, ResolvedItem};
use crate::metrics::{LINES_RESOLVED, LINES_SKIPPED, LINES_UNRESOLVED};
use crate::parse::parse_inventory;

/// Strip accents (NFD, drop combining marks), lowercase, punctuation to
/// spaces, collapse whitespace runs.
pub fn normalize(name: &str) -> String {
    let folded: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c.to_lowercase().next().unwrap_or(c) } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens(s: &str) -> BTreeSet<String> {
    normalize(s).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

fn join_parts(parts: &[&str]) -> String {
    parts.iter().filter(|p| !p.is_empty()).copied().collect::<Vec<_>>().join(" ")
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// (token-set score, sorted-token similarity), both in 0.0..=1.0.
fn token_scores(a: &str, b: &str) -> (f64, f64) {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return (0.0, 0.0);
    }
    let sect: BTreeSet<String> = ta.intersection(&tb).cloned().collect();
    let diff_a: BTreeSet<String> = ta.difference(&tb).cloned().collect();
    let diff_b: BTreeSet<String> = tb.difference(&ta).cloned().collect();

    let (sect_s, da, db) = (join(&sect), join(&diff_a), join(&diff_b));
    let with_a = join_parts(&[&sect_s, &da]);
    let with_b = join_parts(&[&sect_s, &db]);

    let sorted_score = ratio(&join(&ta), &join(&tb));
    let mut score = sorted_score.max(ratio(&with_a, &with_b));
    if !sect.is_empty() {
        score = score.max(ratio(&sect_s, &with_a)).max(ratio(&sect_s, &with_b));
    }
    (score, sorted_score)
}

fn to_percent(x: f64) -> u8 {
    (x * 100.0).round().clamp(0.0, 100.0) as u8
}

pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    to_percent(token_scores(a, b).0)
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub entry: &'a DictEntry,
    pub score: u8,
}

/// Among entries sharing the normalized key: exact name, then a
/// case-insensitive name match, then the smallest id.
fn pick_exact<'a>(dict: &'a Dictionary, key: &str, name: &str) -> Option<&'a DictEntry> {
    let rank = |e: &DictEntry| {
        if e.name == name {
            0
        } else if e.name.to_lowercase() == name.to_lowercase() {
            1
        } else {
            2
        }
    };
    dict.entries_for_key(key).min_by(|a, b| rank(*a).cmp(&rank(*b)).then_with(|| a.id.cmp(&b.id)))
}

/// Best dictionary entry for `name`, no threshold applied.
/// Ties: exact (pre-normalization) name first, then the closer sorted-token
/// spelling, then the smallest id.
pub fn best_match<'a>(dict: &'a Dictionary, name: &str) -> Option<Candidate<'a>> {
    let key = normalize(name);
    if let Some(entry) = pick_exact(dict, &key, name) {
        return Some(Candidate { entry, score: 100 });
    }
    // Nama terlalu pendek -> jangan fuzzy
    if key.chars().filter(|c| c.is_alphanumeric()).count() <= 2 {
        return None;
    }

    let mut best: Option<(Candidate<'a>, f64)> = None;
    for entry in dict.entries() {
        let (set_score, closeness) = token_scores(&key, &entry.key);
        let score = to_percent(set_score);
        let better = match &best {
            None => true,
            Some((cur, _)) if score != cur.score => score > cur.score,
            Some((cur, cur_close)) => {
                let exact_new = entry.name == name;
                let exact_cur = cur.entry.name == name;
                match (exact_new, exact_cur) {
                    (true, false) => true,
                    (false, true) => false,
                    _ if closeness != *cur_close => closeness > *cur_close,
                    _ => entry.id < cur.entry.id,
                }
            }
        };
        if better {
            best = Some((Candidate { entry, score }, closeness));
        }
    }
    best.map(|(c, _)| c)
}

/// Output of resolving one pasted text block.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub items: Vec<ResolvedItem>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MatchResolver {
    dict: Arc<Dictionary>,
    threshold: u8,
}

impl MatchResolver {
    pub fn new(dict: Arc<Dictionary>, threshold: u8) -> Self { Self { dict, threshold } }

    pub fn resolve_line(&self, line: &InventoryLine) -> ResolvedItem {
        let key = normalize(&line.name);
        let cand = best_match(&self.dict, &line.name);
        let score = cand.map(|c| c.score).unwrap_or(0);
        let accepted = cand.filter(|c| c.score >= self.threshold);

        let item = ResolvedItem {
            raw_text: line.raw_text.clone(),
            name: key,
            item_id: accepted.map(|c| c.entry.id.clone()),
            canonical_name: accepted.map(|c| c.entry.name.clone()),
            match_score: score,
            requested_quantity: line.parsed_quantity,
        };
        if item.is_resolved() {
            LINES_RESOLVED.inc();
        } else {
            LINES_UNRESOLVED.inc();
            debug!(line = %line.raw_text, score, best = ?cand.map(|c| &c.entry.name), "line unresolved");
        }
        item
    }

    pub fn resolve_text(&self, raw_text: &str) -> Resolution {
        let mut out = Resolution::default();
        for line in parse_inventory(raw_text) {
            if !line.is_sellable() {
                LINES_SKIPPED.inc();
                out.skipped.push(line.raw_text);
                continue;
            }
            if line.name.is_empty() {
                continue;
            }
            out.items.push(self.resolve_line(&line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemId;

    fn dict() -> Arc<Dictionary> {
        Arc::new(
            Dictionary::from_pairs([
                ("Xanax", "206"),
                ("Kitchen Knife", "3"),
                ("Blood Bag : A+", "732"),
                ("Feathery Hotel Coupon", "367"),
                ("Box of Chocolate Bars", "36"),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn normalize_folds_case_and_punctuation() {
        assert_eq!(normalize("  Blood Bag : A+  "), "blood bag a");
        assert_eq!(normalize("KITCHEN---knife"), "kitchen knife");
        assert_eq!(normalize("!!"), "");
    }

    #[test]
    fn token_set_is_order_independent() {
        assert_eq!(token_set_ratio("knife kitchen", "Kitchen Knife"), 100);
        assert_eq!(token_set_ratio("", "xanax"), 0);
        assert!(token_set_ratio("xanex", "xanax") >= 80);
        assert!(token_set_ratio("hotel", "xanax") < 50);
    }

    #[test]
    fn exact_key_scores_100() {
        let d = dict();
        let c = best_match(&d, "XANAX").unwrap();
        assert_eq!(c.entry.id, ItemId::from("206"));
        assert_eq!(c.score, 100);
    }

    #[test]
    fn short_names_are_never_fuzzy_matched() {
        assert!(best_match(&dict(), "xa").is_none());
    }

    #[test]
    fn accents_fold_to_plain_letters() {
        assert_eq!(normalize("Café Crème"), "cafe creme");
        assert_eq!(normalize("Cafe\u{301}"), "cafe");
        let d = Dictionary::from_pairs([("Café Latte", "500")]).unwrap();
        let c = best_match(&d, "cafe latte").unwrap();
        assert_eq!(c.entry.id, ItemId::from("500"));
        assert_eq!(c.score, 100);
    }

    #[test]
    fn token_subset_scores_against_the_shared_tokens() {
        // sect="kitchen knife", sect+diff_b="kitchen knife steel"
        assert_eq!(token_set_ratio("Kitchen Knife", "Kitchen Knife Steel"), 100);
        assert_eq!(token_set_ratio("Steel Kitchen Knife", "knife kitchen"), 100);
        // tanpa token bersama tidak ada bonus irisan
        assert!(token_set_ratio("hotel", "hotels") < 100);
    }

    #[test]
    fn subset_ties_prefer_the_closer_name() {
        let d = Dictionary::from_pairs([("Knife", "1"), ("Kitchen Knife", "3")]).unwrap();
        let c = best_match(&d, "Kitchen Knife Deluxe").unwrap();
        assert_eq!(c.score, 100);
        assert_eq!(c.entry.id, ItemId::from("3"));
    }

    #[test]
    fn names_sharing_a_key_resolve_by_exact_name() {
        let d = Dictionary::from_pairs([("Blood Bag : A+", "732"), ("Blood Bag : A-", "733")]).unwrap();
        assert_eq!(best_match(&d, "Blood Bag : A+").unwrap().entry.id, ItemId::from("732"));
        assert_eq!(best_match(&d, "Blood Bag : A-").unwrap().entry.id, ItemId::from("733"));
        assert_eq!(best_match(&d, "blood bag : a-").unwrap().entry.id, ItemId::from("733"));
        // tanpa tanda apa pun -> id terkecil
        assert_eq!(best_match(&d, "Blood Bag A").unwrap().entry.id, ItemId::from("732"));

        let r = MatchResolver::new(Arc::new(d), 85);
        let res = r.resolve_text("Blood Bag : A- x2\nBlood Bag : A+");
        assert_eq!(res.items[0].item_id, Some(ItemId::from("733")));
        assert_eq!(res.items[0].canonical_name.as_deref(), Some("Blood Bag : A-"));
        assert_eq!(res.items[0].requested_quantity, 2);
        assert_eq!(res.items[1].item_id, Some(ItemId::from("732")));
    }

    #[test]
    fn ties_prefer_exact_name_then_smallest_id() {
        let d = Dictionary::from_pairs([("Alpha Beta", "9"), ("Beta Alpha", "10"), ("Gamma", "1")]).unwrap();
        // dua entry dengan skor fuzzy sama -> id terkecil secara leksikografis
        let c = best_match(&d, "beta  alpha x").unwrap();
        assert_eq!(c.entry.id, ItemId::from("10"));

        let c = best_match(&d, "Alpha Beta").unwrap();
        assert_eq!(c.entry.id, ItemId::from("9"));
    }

    #[test]
    fn resolver_applies_threshold_and_reports_unresolved() {
        let r = MatchResolver::new(dict(), 85);
        let res = r.resolve_text("Xanax x3\nKitchen Knfe\nSomething Else Entirely\n");
        assert_eq!(res.items.len(), 3);
        assert_eq!(res.items[0].item_id, Some(ItemId::from("206")));
        assert_eq!(res.items[0].requested_quantity, 3);
        assert_eq!(res.items[1].item_id, Some(ItemId::from("3")));
        assert!(!res.items[2].is_resolved());
        assert!(res.items[2].match_score < 85);
    }

    #[test]
    fn resolver_skips_equipped_and_untradable() {
        let r = MatchResolver::new(dict(), 85);
        let res = r.resolve_text("Kitchen Knife (equipped)\nXanax [untradable]\nBlood Bag : A+");
        assert_eq!(res.items.len(), 1);
        assert_eq!(res.skipped.len(), 2);
    }

    #[test]
    fn resolution_is_idempotent() {
        let r = MatchResolver::new(dict(), 85);
        let a = r.resolve_text("feathery hotel cupon");
        let b = r.resolve_text("feathery hotel cupon");
        assert_eq!(a.items, b.items);
    }

    #[test]
    fn empty_text_resolves_nothing() {
        let r = MatchResolver::new(dict(), 85);
        assert!(r.resolve_text("").items.is_empty());
    }
}
