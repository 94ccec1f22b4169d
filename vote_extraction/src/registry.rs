use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Member;

// Honorifics and titles that precede names in minutes.
static TITLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:council ?members?|council ?woman|council ?man|mayor pro tem(?:pore)?|vice mayor|deputy mayor|mayor|vice chair(?:person|woman|man)?|chair(?:person|woman|man)?|commissioner|supervisor|alder(?:man|woman|person)|trustee|director|board members?|members?|honorable|hon|dr|mr|mrs|ms) )+",
    )
    .expect("title pattern")
});

/// How a name was matched against the roster.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Resolution<'a> {
    Exact(&'a Member),
    Fuzzy(&'a Member, usize),
    Unresolved,
}

impl<'a> Resolution<'a> {
    pub fn member(&self) -> Option<&'a Member> {
        match self {
            Resolution::Exact(m) | Resolution::Fuzzy(m, _) => Some(m),
            Resolution::Unresolved => None,
        }
    }
}

/// The roster of one city, current and historical members.
///
/// The registry is read-only once built and can be shared between
/// concurrent extractions.
#[derive(Debug, Clone)]
pub struct MemberRegistry {
    city: String,
    members: Vec<Member>,
    // normalized name -> indexes in members
    index: HashMap<String, Vec<usize>>,
    max_edit_distance: usize,
}

impl MemberRegistry {
    pub fn new(city: &str, members: Vec<Member>, max_edit_distance: usize) -> MemberRegistry {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut insert = |key: String, idx: usize| {
            if key.is_empty() {
                return;
            }
            let e = index.entry(key).or_insert_with(Vec::new);
            if !e.contains(&idx) {
                e.push(idx);
            }
        };
        for (idx, m) in members.iter().enumerate() {
            let canonical = normalize_name(&m.canonical_name);
            // Minutes mostly refer to members by surname.
            if let Some(surname) = canonical.split(' ').last() {
                insert(surname.to_string(), idx);
            }
            insert(canonical, idx);
            for v in m.name_variants.iter() {
                insert(normalize_name(v), idx);
            }
        }
        debug!(
            "MemberRegistry::new: city {} with {} members, {} index keys",
            city,
            members.len(),
            index.len()
        );
        MemberRegistry {
            city: city.to_string(),
            members,
            index,
            max_edit_distance,
        }
    }

    pub fn empty(city: &str) -> MemberRegistry {
        MemberRegistry::new(city, Vec::new(), 0)
    }

    pub fn city(&self) -> &str {
        self.city.as_str()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn active_members(&self, on: NaiveDate) -> Vec<&Member> {
        self.members.iter().filter(|m| m.is_active_on(on)).collect()
    }

    pub fn roster_size(&self, on: NaiveDate) -> usize {
        self.members.iter().filter(|m| m.is_active_on(on)).count()
    }

    /// Resolves a name as written in the minutes.
    ///
    /// Exact matches on the normalized canonical name, variants and surnames
    /// are tried first, then the closest key within the edit distance bound.
    /// Members in office on the given date are preferred; an ambiguous name
    /// stays unresolved.
    pub fn resolve(&self, raw: &str, on: NaiveDate) -> Resolution<'_> {
        let needle = normalize_name(raw);
        if needle.is_empty() {
            return Resolution::Unresolved;
        }
        if let Some(idxs) = self.index.get(&needle) {
            if let Some(idx) = self.pick(idxs, on) {
                return Resolution::Exact(&self.members[idx]);
            }
            // Known but ambiguous: guessing would be worse than not knowing.
            return Resolution::Unresolved;
        }

        let bound = self.max_edit_distance.min(needle.chars().count() / 3);
        if bound == 0 {
            return Resolution::Unresolved;
        }
        for active_only in [true, false] {
            let mut best: Option<(usize, Vec<usize>)> = None;
            for (key, idxs) in self.index.iter() {
                let candidates: Vec<usize> = idxs
                    .iter()
                    .cloned()
                    .filter(|i| !active_only || self.members[*i].is_active_on(on))
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                let d = strsim::levenshtein(key, &needle);
                if d > bound {
                    continue;
                }
                match best.as_mut() {
                    Some((bd, bidx)) if d == *bd => {
                        for c in candidates {
                            if !bidx.contains(&c) {
                                bidx.push(c);
                            }
                        }
                    }
                    Some((bd, _)) if d > *bd => {}
                    _ => best = Some((d, candidates)),
                }
            }
            match best {
                Some((d, idxs)) if idxs.len() == 1 => {
                    debug!(
                        "resolve: {:?} matched {:?} at distance {}",
                        raw, self.members[idxs[0]].canonical_name, d
                    );
                    return Resolution::Fuzzy(&self.members[idxs[0]], d);
                }
                Some(_) => return Resolution::Unresolved,
                None => {}
            }
        }
        Resolution::Unresolved
    }

    pub fn resolve_name(&self, raw: &str, on: NaiveDate) -> Option<&Member> {
        self.resolve(raw, on).member()
    }

    /// True if the name resolves to a member in office on the date.
    pub fn is_active_member(&self, raw: &str, on: NaiveDate) -> bool {
        self.resolve_name(raw, on)
            .map(|m| m.is_active_on(on))
            .unwrap_or(false)
    }

    fn pick(&self, idxs: &[usize], on: NaiveDate) -> Option<usize> {
        if idxs.len() == 1 {
            return idxs.first().cloned();
        }
        let active: Vec<usize> = idxs
            .iter()
            .cloned()
            .filter(|i| self.members[*i].is_active_on(on))
            .collect();
        match active.as_slice() {
            [idx] => Some(*idx),
            _ => None,
        }
    }
}

/// Lowercases, folds accents, drops punctuation and leading titles.
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(fold_accent)
        .flat_map(|c| c.to_lowercase())
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<&str>>().join(" ");
    TITLES.replace(&collapsed, "").trim().to_string()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ç' => 'c',
        'Ç' => 'C',
        _ => c,
    }
}
