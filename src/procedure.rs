use crate::context::{ContextCategory, ContextEntry, ContextIndex};
use crate::error::{Result, SessionError};
use csv::{ReaderBuilder, StringRecord};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// What a session-id marker does when the dispatcher reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAction {
    Continue,
    Stop,
}

/// Marker table used when none is configured: the first session boundary is
/// logged and passed, later ones end the run.
pub fn default_session_markers() -> BTreeMap<String, MarkerAction> {
    BTreeMap::from([
        ("Session1".to_string(), MarkerAction::Continue),
        ("Session2".to_string(), MarkerAction::Stop),
        ("Session3".to_string(), MarkerAction::Stop),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    pub has_headers: bool,
    pub session_markers: BTreeMap<String, MarkerAction>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            has_headers: true,
            session_markers: default_session_markers(),
        }
    }
}

/// Trial handler selected for a procedural row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialKind {
    Instruct,
    Study,
    GenTest,
    RecTest,
    GenRecTest,
    SessionBoundary { terminal: bool },
    Passthrough,
}

impl TrialKind {
    /// Phase tags are checked first, then session markers, then `NA`/empty rows.
    fn classify(
        session_id: &str,
        phase: &str,
        markers: &BTreeMap<String, MarkerAction>,
    ) -> Option<Self> {
        match phase {
            "instruct" => return Some(Self::Instruct),
            "Study" => return Some(Self::Study),
            "GenTest" => return Some(Self::GenTest),
            "RecTest" => return Some(Self::RecTest),
            "GenRecTest" => return Some(Self::GenRecTest),
            _ => {}
        }

        if let Some(action) = markers.get(session_id) {
            return Some(Self::SessionBoundary {
                terminal: *action == MarkerAction::Stop,
            });
        }

        match phase {
            "" | "NA" => Some(Self::Passthrough),
            _ => None,
        }
    }

    /// Fewest columns a row of this kind can have.
    pub fn min_fields(&self) -> usize {
        match self {
            Self::Instruct => 2,
            Self::Study | Self::RecTest => 8,
            Self::GenTest => 4,
            Self::GenRecTest => 6,
            Self::SessionBoundary { .. } | Self::Passthrough => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Instruct => "instruct",
            Self::Study => "Study",
            Self::GenTest => "GenTest",
            Self::RecTest => "RecTest",
            Self::GenRecTest => "GenRecTest",
            Self::SessionBoundary { .. } => "session boundary",
            Self::Passthrough => "NA",
        }
    }
}

/// One validated row of the procedural file.
///
/// `raw` keeps every column so the result row can carry the full procedural
/// row (including subject/stimulus columns this crate never interprets).
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec {
    pub line: u64,
    pub kind: TrialKind,
    pub session_id: String,
    pub phase: String,
    pub painting: String,
    pub artist: String,
    pub schedule: String,
    pub context_path: String,
    pub context_dir: String,
    pub context_category: Option<ContextCategory>,
    pub block: String,
    pub instruction_ref: String,
    pub raw: Vec<String>,
}

impl TrialSpec {
    fn from_record(
        record: &StringRecord,
        line: u64,
        source_name: &str,
        options: &ParseOptions,
    ) -> Result<Self> {
        let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();

        if record.len() < 2 {
            return Err(SessionError::malformed(
                source_name,
                line,
                format!("expected at least 2 fields, found {}", record.len()),
            ));
        }

        let session_id = field(0);
        let phase = field(1);
        let kind = TrialKind::classify(&session_id, &phase, &options.session_markers)
            .ok_or_else(|| {
                SessionError::malformed(source_name, line, format!("unknown phase tag '{phase}'"))
            })?;

        if record.len() < kind.min_fields() {
            return Err(SessionError::malformed(
                source_name,
                line,
                format!(
                    "{} row needs at least {} fields, found {}",
                    kind.label(),
                    kind.min_fields(),
                    record.len()
                ),
            ));
        }

        let category_tag = field(7);
        let context_category = ContextCategory::from_tag(&category_tag);
        if matches!(kind, TrialKind::Study | TrialKind::RecTest) && context_category.is_none() {
            return Err(SessionError::malformed(
                source_name,
                line,
                format!("context category must be 'mm' or 'nat', found '{category_tag}'"),
            ));
        }

        Ok(Self {
            line,
            kind,
            session_id,
            phase,
            painting: field(2),
            artist: field(3),
            schedule: field(4),
            context_path: field(5),
            context_dir: field(6),
            context_category,
            block: field(8),
            instruction_ref: field(9),
            raw: record.iter().map(str::to_string).collect(),
        })
    }
}

/// The ordered trial list for a session. Order is the experiment sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProceduralTable {
    trials: Vec<TrialSpec>,
}

impl ProceduralTable {
    pub fn parse<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file, &path.display().to_string(), options)
    }

    pub fn from_reader<R: Read>(reader: R, source_name: &str, options: &ParseOptions) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(options.has_headers)
            .flexible(true)
            .from_reader(reader);

        let mut trials = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            trials.push(TrialSpec::from_record(&record, line, source_name, options)?);
        }

        Ok(Self { trials })
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrialSpec> {
        self.trials.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrialSpec> {
        self.trials.iter()
    }

    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }

    /// The first contiguous block of study rows. The artist roster is built
    /// from it alone.
    fn study_block(&self) -> impl Iterator<Item = &TrialSpec> {
        self.trials
            .iter()
            .skip_while(|t| t.kind != TrialKind::Study)
            .take_while(|t| t.kind == TrialKind::Study)
    }

    /// Artists in the order they first appear during study.
    pub fn artists(&self) -> Vec<String> {
        self.study_block()
            .map(|t| t.artist.clone())
            .unique()
            .collect()
    }

    /// Pairings from every study row in the table, so a recognition trial after
    /// a later study block still finds its painting.
    pub fn context_index(&self) -> ContextIndex {
        let study = self.trials.iter().filter(|t| t.kind == TrialKind::Study);
        ContextIndex::from_entries(study.filter_map(|t| {
            t.context_category.map(|category| ContextEntry {
                painting: t.painting.clone(),
                artist: t.artist.clone(),
                context_path: t.context_path.clone(),
                category,
            })
        }))
    }

    /// Number of instruction rows before `index`.
    pub fn instructions_before(&self, index: usize) -> usize {
        self.trials
            .iter()
            .take(index)
            .filter(|t| t.kind == TrialKind::Instruct)
            .count()
    }
}

impl<'a> IntoIterator for &'a ProceduralTable {
    type Item = &'a TrialSpec;
    type IntoIter = std::slice::Iter<'a, TrialSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.trials.iter()
    }
}
