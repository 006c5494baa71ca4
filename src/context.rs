use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// How many context images of each category a recognition trial shows.
pub const PER_CATEGORY: usize = 3;

/// Category of a context ("location") image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextCategory {
    ManMade,
    Natural,
}

impl ContextCategory {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "mm" => Some(Self::ManMade),
            "nat" => Some(Self::Natural),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::ManMade => "mm",
            Self::Natural => "nat",
        }
    }
}

/// One painting/context pairing seen during the study phase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContextEntry {
    pub painting: String,
    pub artist: String,
    pub context_path: String,
    pub category: ContextCategory,
}

/// Sorted, de-duplicated set of study pairings used to build recognition trials
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextIndex {
    entries: Vec<ContextEntry>,
}

impl ContextIndex {
    pub fn from_entries<I: IntoIterator<Item = ContextEntry>>(entries: I) -> Self {
        let entries = entries
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the shuffled choice set for a recognition trial using the thread rng.
    pub fn sample(
        &self,
        target_painting: &str,
        artist: &str,
        target_category: ContextCategory,
    ) -> Vec<String> {
        self.sample_with_rng(
            target_painting,
            artist,
            target_category,
            &mut rand::thread_rng(),
        )
    }

    /// Build the choice set for a recognition trial.
    ///
    /// The target painting's own context is always included. Distractors are the
    /// artist's other study pairings, admitted in random order until each category
    /// holds `PER_CATEGORY` paths (the target counts toward its own category).
    /// Artists with too few pairings in a category simply yield a shorter list.
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        target_painting: &str,
        artist: &str,
        target_category: ContextCategory,
        rng: &mut R,
    ) -> Vec<String> {
        let mut chosen = Vec::with_capacity(PER_CATEGORY * 2);
        let mut distractors = Vec::new();

        for entry in self.entries.iter().filter(|e| e.artist == artist) {
            if entry.painting == target_painting {
                chosen.push(entry.context_path.clone());
            } else {
                distractors.push(entry);
            }
        }

        let (mut man_made, mut natural) = match target_category {
            ContextCategory::ManMade => (1, 0),
            ContextCategory::Natural => (0, 1),
        };

        distractors.shuffle(rng);
        for entry in distractors {
            let admitted = match entry.category {
                ContextCategory::ManMade => &mut man_made,
                ContextCategory::Natural => &mut natural,
            };
            if *admitted < PER_CATEGORY {
                chosen.push(entry.context_path.clone());
                *admitted += 1;
            }
        }

        chosen.shuffle(rng);
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entry(painting: &str, artist: &str, ctx: &str, category: ContextCategory) -> ContextEntry {
        ContextEntry {
            painting: painting.to_string(),
            artist: artist.to_string(),
            context_path: ctx.to_string(),
            category,
        }
    }

    /// `mm` man-made and `nat` natural pairings for one artist plus a decoy artist.
    fn index(mm: usize, nat: usize) -> ContextIndex {
        let mut entries = Vec::new();
        for i in 0..mm {
            entries.push(entry(
                &format!("p/mm{i}.jpg"),
                "Monet",
                &format!("c/mm{i}.jpg"),
                ContextCategory::ManMade,
            ));
        }
        for i in 0..nat {
            entries.push(entry(
                &format!("p/nat{i}.jpg"),
                "Monet",
                &format!("c/nat{i}.jpg"),
                ContextCategory::Natural,
            ));
        }
        entries.push(entry(
            "p/other.jpg",
            "Turner",
            "c/other.jpg",
            ContextCategory::ManMade,
        ));
        ContextIndex::from_entries(entries)
    }

    fn count(paths: &[String], prefix: &str) -> usize {
        paths.iter().filter(|p| p.starts_with(prefix)).count()
    }

    #[test]
    fn test_category_tags() {
        assert_eq!(ContextCategory::from_tag("mm"), Some(ContextCategory::ManMade));
        assert_eq!(ContextCategory::from_tag(" nat "), Some(ContextCategory::Natural));
        assert_eq!(ContextCategory::from_tag("urban"), None);
        assert_eq!(ContextCategory::Natural.tag(), "nat");
    }

    #[test]
    fn test_index_is_sorted_and_deduplicated() {
        let idx = ContextIndex::from_entries(vec![
            entry("b.jpg", "A", "c2.jpg", ContextCategory::Natural),
            entry("a.jpg", "A", "c1.jpg", ContextCategory::ManMade),
            entry("b.jpg", "A", "c2.jpg", ContextCategory::Natural),
        ]);
        let paintings: Vec<_> = idx.entries().iter().map(|e| e.painting.as_str()).collect();
        assert_eq!(paintings, vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_sample_balanced_when_enough_distractors() {
        let idx = index(6, 6);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let sample =
                idx.sample_with_rng("p/mm0.jpg", "Monet", ContextCategory::ManMade, &mut rng);

            assert_eq!(sample.len(), 6);
            assert!(sample.contains(&"c/mm0.jpg".to_string()));
            assert_eq!(count(&sample, "c/mm"), 3);
            assert_eq!(count(&sample, "c/nat"), 3);

            let distinct: BTreeSet<_> = sample.iter().collect();
            assert_eq!(distinct.len(), 6);
        }
    }

    #[test]
    fn test_sample_natural_target_counts_toward_natural() {
        let idx = index(4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = idx.sample_with_rng("p/nat2.jpg", "Monet", ContextCategory::Natural, &mut rng);

        assert!(sample.contains(&"c/nat2.jpg".to_string()));
        assert_eq!(count(&sample, "c/nat"), 3);
        assert_eq!(count(&sample, "c/mm"), 3);
    }

    #[test]
    fn test_sample_degenerate_category_returns_what_exists() {
        let idx = index(5, 1);
        let mut rng = StdRng::seed_from_u64(3);
        let sample = idx.sample_with_rng("p/mm0.jpg", "Monet", ContextCategory::ManMade, &mut rng);

        assert_eq!(count(&sample, "c/nat"), 1);
        assert_eq!(count(&sample, "c/mm"), 3);
        assert_eq!(sample.len(), 4);
    }

    #[test]
    fn test_sample_ignores_other_artists() {
        let idx = index(2, 2);
        let sample = idx.sample("p/mm0.jpg", "Monet", ContextCategory::ManMade);
        assert!(!sample.contains(&"c/other.jpg".to_string()));
        assert_eq!(sample.len(), 4);
    }

    #[test]
    fn test_sample_unknown_artist_is_empty() {
        let idx = index(3, 3);
        assert!(idx
            .sample("p/mm0.jpg", "Vermeer", ContextCategory::ManMade)
            .is_empty());
    }

    #[test]
    fn test_sample_target_position_varies() {
        let idx = index(6, 6);
        let positions: BTreeSet<_> = (0..40)
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                idx.sample_with_rng("p/mm0.jpg", "Monet", ContextCategory::ManMade, &mut rng)
                    .iter()
                    .position(|p| p == "c/mm0.jpg")
                    .unwrap()
            })
            .collect();
        assert!(positions.len() > 1);
    }
}
