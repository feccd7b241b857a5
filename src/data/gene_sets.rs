//! Gene-set database held in memory

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::UniverseConfig;
use crate::error::{DgeError, Result};

/// A named gene set with its database tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSet {
    pub name: String,
    pub category: String,
    pub subcategory: String,
    /// Member identifiers, first-seen order, no duplicates
    pub members: Vec<String>,
    /// Pruned by ontology depth; never tested
    pub excluded: bool,
}

/// One membership row of a long-format gene-set table
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRow {
    pub name: String,
    pub category: String,
    pub subcategory: String,
    pub member: String,
    pub excluded: bool,
}

/// All gene sets of a run; immutable after loading
#[derive(Debug, Clone, Default)]
pub struct GeneSetCollection {
    sets: Vec<GeneSet>,
}

impl GeneSetCollection {
    pub fn new(sets: Vec<GeneSet>) -> Self {
        Self { sets }
    }

    /// Gather membership rows into sets, preserving first-seen order.
    /// A set whose rows disagree on category or exclusion is rejected.
    pub fn from_rows(rows: impl IntoIterator<Item = MembershipRow>) -> Result<Self> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut seen_members: Vec<HashSet<String>> = Vec::new();
        let mut sets: Vec<GeneSet> = Vec::new();

        for row in rows {
            let idx = match index.get(&row.name) {
                Some(&i) => {
                    let set = &sets[i];
                    if set.category != row.category
                        || set.subcategory != row.subcategory
                        || set.excluded != row.excluded
                    {
                        return Err(DgeError::InvalidGeneSets {
                            reason: format!(
                                "gene set '{}' has conflicting category or exclusion flags",
                                row.name
                            ),
                        });
                    }
                    i
                }
                None => {
                    index.insert(row.name.clone(), sets.len());
                    sets.push(GeneSet {
                        name: row.name.clone(),
                        category: row.category.clone(),
                        subcategory: row.subcategory.clone(),
                        members: Vec::new(),
                        excluded: row.excluded,
                    });
                    seen_members.push(HashSet::new());
                    sets.len() - 1
                }
            };
            if !row.member.is_empty() && seen_members[idx].insert(row.member.clone()) {
                sets[idx].members.push(row.member);
            }
        }

        Ok(Self { sets })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> &[GeneSet] {
        &self.sets
    }

    /// Non-excluded sets selected by the universe's category filters
    pub fn universe(&self, universe: &UniverseConfig) -> Vec<&GeneSet> {
        self.sets
            .iter()
            .filter(|s| !s.excluded)
            .filter(|s| {
                universe
                    .categories
                    .iter()
                    .any(|f| f.matches(&s.category, &s.subcategory))
            })
            .collect()
    }

    /// Rewrite members through an identifier map (external id -> gene ids).
    /// Members without a mapping are dropped.
    pub fn translate(&self, id_map: &HashMap<String, Vec<String>>) -> Self {
        let sets = self
            .sets
            .iter()
            .map(|set| {
                let mut seen = HashSet::new();
                let members = set
                    .members
                    .iter()
                    .filter_map(|m| id_map.get(m))
                    .flatten()
                    .filter(|g| seen.insert(g.as_str()))
                    .cloned()
                    .collect();
                GeneSet {
                    members,
                    ..set.clone()
                }
            })
            .collect();
        Self { sets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryFilter, SubsetAlpha};

    fn row(name: &str, cat: &str, sub: &str, member: &str, excluded: bool) -> MembershipRow {
        MembershipRow {
            name: name.to_string(),
            category: cat.to_string(),
            subcategory: sub.to_string(),
            member: member.to_string(),
            excluded,
        }
    }

    #[test]
    fn test_from_rows_gathers_and_dedups() {
        let sets = GeneSetCollection::from_rows(vec![
            row("HALLMARK_A", "H", "", "g1", false),
            row("KEGG_B", "C2", "CP:KEGG", "g2", false),
            row("HALLMARK_A", "H", "", "g3", false),
            row("HALLMARK_A", "H", "", "g1", false),
        ])
        .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets.sets()[0].members, vec!["g1".to_string(), "g3".to_string()]);
    }

    #[test]
    fn test_conflicting_rows_rejected() {
        let result = GeneSetCollection::from_rows(vec![
            row("X", "H", "", "g1", false),
            row("X", "C2", "", "g2", false),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_universe_skips_excluded() {
        let sets = GeneSetCollection::from_rows(vec![
            row("GOBP_A", "C5", "GO:BP", "g1", false),
            row("GOBP_B", "C5", "GO:BP", "g1", true),
            row("TFT_C", "C3", "TFT:GTRD", "g1", false),
        ])
        .unwrap();
        let universe = UniverseConfig {
            name: "pathway".to_string(),
            categories: vec![CategoryFilter::new("C5", Some("GO:BP"))],
            alpha: SubsetAlpha::default(),
        };
        let selected = sets.universe(&universe);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "GOBP_A");
    }

    #[test]
    fn test_translate_members() {
        let sets = GeneSetCollection::from_rows(vec![
            row("S", "H", "", "100", false),
            row("S", "H", "", "200", false),
            row("S", "H", "", "999", false),
        ])
        .unwrap();
        let mut map = HashMap::new();
        map.insert("100".to_string(), vec!["ENSG1".to_string()]);
        map.insert("200".to_string(), vec!["ENSG1".to_string(), "ENSG2".to_string()]);
        let translated = sets.translate(&map);
        assert_eq!(
            translated.sets()[0].members,
            vec!["ENSG1".to_string(), "ENSG2".to_string()]
        );
    }
}
