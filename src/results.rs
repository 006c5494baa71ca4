use crate::error::Result;
use crate::procedure::TrialSpec;
use crate::scoring::{score, Accuracy, ReactionTime, NA};
use chrono::{DateTime, Local};
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

const BASE_COLUMNS: [&str; 10] = [
    "ItemNum", "Phase", "Painting", "Artist", "Schedule", "ConDir", "ConName", "ConCat", "Block",
    "Notes",
];
const SUBJECT_COLUMNS: [&str; 4] = ["Subj", "Stimset", "Stimsubset", "Order"];
const OUTCOME_COLUMNS: [&str; 3] = ["Accuracy", "Reaction Time", "Selected Artist"];
const TIMESTAMP_COLUMNS: [&str; 2] = ["Date", "Time"];

/// Column layout of a results file. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSchema {
    /// Carry the `Subj, Stimset, Stimsubset, Order` procedural columns.
    pub subject_columns: bool,
    /// Append `Date, Time` of the moment each row was written.
    pub timestamp_columns: bool,
}

impl Default for ResultsSchema {
    fn default() -> Self {
        Self {
            subject_columns: true,
            timestamp_columns: false,
        }
    }
}

impl ResultsSchema {
    /// Number of procedural columns copied into each result row.
    pub fn passthrough_width(&self) -> usize {
        BASE_COLUMNS.len()
            + if self.subject_columns {
                SUBJECT_COLUMNS.len()
            } else {
                0
            }
    }

    pub fn header(&self) -> Vec<&'static str> {
        let mut header = BASE_COLUMNS.to_vec();
        if self.subject_columns {
            header.extend(SUBJECT_COLUMNS);
        }
        header.extend(OUTCOME_COLUMNS);
        if self.timestamp_columns {
            header.extend(TIMESTAMP_COLUMNS);
        }
        header
    }

    /// Render a record as a row with exactly `header().len()` fields. Procedural
    /// columns are padded with empty fields or cut to the passthrough width.
    pub fn row(&self, record: &ResultRecord) -> Vec<String> {
        let width = self.passthrough_width();
        let mut row: Vec<String> = record
            .fields
            .iter()
            .take(width)
            .cloned()
            .chain(std::iter::repeat(String::new()))
            .take(width)
            .collect();

        row.push(record.outcome.accuracy.to_string());
        row.push(record.outcome.reaction_time.to_string());
        row.push(record.outcome.response.clone());

        if self.timestamp_columns {
            row.push(record.written_at.format("%Y-%m-%d").to_string());
            row.push(record.written_at.format("%H:%M:%S").to_string());
        }
        row
    }
}

/// Outcome columns of a result row
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub accuracy: Accuracy,
    pub reaction_time: ReactionTime,
    pub response: String,
}

impl TrialOutcome {
    /// Outcome for rows that never collect a response.
    pub fn not_applicable() -> Self {
        Self {
            accuracy: Accuracy::NotApplicable,
            reaction_time: ReactionTime::NotApplicable,
            response: NA.to_string(),
        }
    }

    pub fn scored(response: impl Into<String>, correct: &str, reaction_time: ReactionTime) -> Self {
        let response = response.into();
        Self {
            accuracy: score(&response, correct),
            reaction_time,
            response,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub fields: Vec<String>,
    pub outcome: TrialOutcome,
    pub written_at: DateTime<Local>,
}

impl ResultRecord {
    pub fn new(trial: &TrialSpec, outcome: TrialOutcome) -> Self {
        Self {
            fields: trial.raw.clone(),
            outcome,
            written_at: Local::now(),
        }
    }

    pub fn phase(&self) -> &str {
        self.fields.get(1).map(String::as_str).unwrap_or("")
    }
}

/// Destination for result records. Every append must be durable on return.
pub trait ResultSink {
    fn append(&mut self, record: &ResultRecord) -> Result<()>;
}

impl ResultSink for Vec<ResultRecord> {
    fn append(&mut self, record: &ResultRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// What an existing results file says about an interrupted session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeState {
    pub row_count: usize,
    pub instruction_count: usize,
}

impl ResumeState {
    pub fn from_rows(rows: &[StringRecord]) -> Self {
        Self {
            row_count: rows.len(),
            instruction_count: rows
                .iter()
                .filter(|r| r.get(1) == Some("instruct"))
                .count(),
        }
    }
}

/// Append-only results file. The number of data rows on disk is the resume
/// checkpoint, so each row is flushed and synced before `append` returns.
#[derive(Debug)]
pub struct ResultsLog {
    path: PathBuf,
    schema: ResultsSchema,
    writer: Writer<File>,
}

impl ResultsLog {
    /// Create the file with its header row. Never touches an existing file.
    pub fn create<P: AsRef<Path>>(path: P, schema: &ResultsSchema) -> Result<CreateOutcome> {
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = WriterBuilder::new().from_writer(file);
        writer.write_record(schema.header())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(CreateOutcome::Created)
    }

    /// Data rows of an existing results file, header excluded.
    pub fn read_rows<P: AsRef<Path>>(path: P) -> Result<Vec<StringRecord>> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path.as_ref())?;
        let mut rows = Vec::new();
        for row in rdr.records() {
            rows.push(row?);
        }
        Ok(rows)
    }

    pub fn read_resume_state<P: AsRef<Path>>(path: P) -> Result<ResumeState> {
        Ok(ResumeState::from_rows(&Self::read_rows(path)?))
    }

    /// Header row of an existing results file.
    pub fn read_header<P: AsRef<Path>>(path: P) -> Result<StringRecord> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path.as_ref())?;
        Ok(rdr.headers()?.clone())
    }

    pub fn open_append<P: AsRef<Path>>(path: P, schema: &ResultsSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            schema: *schema,
            writer: WriterBuilder::new().from_writer(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &ResultsSchema {
        &self.schema
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

impl ResultSink for ResultsLog {
    fn append(&mut self, record: &ResultRecord) -> Result<()> {
        self.writer.write_record(self.schema.row(record))?;
        self.sync()?;
        Ok(())
    }
}
