use crate::error::{Result, SessionError};
use crate::instructions::InstructionSource;
use crate::procedure::{default_session_markers, MarkerAction, ParseOptions};
use crate::results::ResultsSchema;
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Trial ordering the procedural file was generated for
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Blocked,
    Interleaved,
}

impl Condition {
    /// Tag used in the procedure and results file names.
    pub fn file_tag(&self) -> &'static str {
        match self {
            Self::Blocked => "BF",
            Self::Interleaved => "IF",
        }
    }
}

/// Device the subject answers with
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Click on-screen buttons
    Pointer,
    /// Scanner button box, keys 8 7 6 / 1 2 3
    #[default]
    ButtonBoxA,
    /// Home-row keys s d f / j k l
    ButtonBoxB,
}

impl InputMode {
    /// Keys that select answer slots 0..6, or `None` for pointer input.
    pub fn response_keys(&self) -> Option<[char; 6]> {
        match self {
            Self::Pointer => None,
            Self::ButtonBoxA => Some(['8', '7', '6', '1', '2', '3']),
            Self::ButtonBoxB => Some(['s', 'd', 'f', 'j', 'k', 'l']),
        }
    }

    /// Buttons per row of the answer grid.
    pub fn columns(&self) -> usize {
        match self {
            Self::Pointer => 3,
            Self::ButtonBoxA | Self::ButtonBoxB => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayResolution {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayResolution {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub condition: Condition,
    pub subject_id: String,
    pub input_mode: InputMode,
    pub display: DisplayResolution,
    pub timeout_secs: f64,
    pub buffer_delay_secs: f64,
    pub feedback_delay_secs: f64,
    pub selection_echo_secs: f64,
    /// Prefix prepended to every stimulus path.
    pub file_path: String,
    pub procedural_has_header: bool,
    pub instruction_source: InstructionSource,
    pub schema: ResultsSchema,
    pub session_markers: BTreeMap<String, MarkerAction>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            condition: Condition::Blocked,
            subject_id: "001".to_string(),
            input_mode: InputMode::ButtonBoxA,
            display: DisplayResolution::default(),
            timeout_secs: 10.0,
            buffer_delay_secs: 1.0,
            feedback_delay_secs: 2.5,
            selection_echo_secs: 0.5,
            file_path: String::new(),
            procedural_has_header: true,
            instruction_source: InstructionSource::Running,
            schema: ResultsSchema::default(),
            session_markers: default_session_markers(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.subject_id.trim().is_empty() {
            return Err(SessionError::Config("subject_id must not be empty".into()));
        }
        for (name, secs) in [
            ("timeout_secs", self.timeout_secs),
            ("buffer_delay_secs", self.buffer_delay_secs),
            ("feedback_delay_secs", self.feedback_delay_secs),
            ("selection_echo_secs", self.selection_echo_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(SessionError::Config(format!(
                    "{name} must be a non-negative number of seconds, got {secs}"
                )));
            }
        }
        if self.timeout_secs == 0.0 {
            return Err(SessionError::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            has_headers: self.procedural_has_header,
            session_markers: self.session_markers.clone(),
        }
    }

    /// Directory paintings and context images are resolved against.
    pub fn stimulus_root(&self) -> PathBuf {
        PathBuf::from(&self.file_path)
    }

    /// Directory instruction images are resolved against.
    pub fn image_root(&self) -> PathBuf {
        self.stimulus_root().join("images")
    }

    fn file_stem(&self) -> String {
        format!("{}_{}", self.subject_id, self.condition.file_tag())
    }

    pub fn procedure_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_FullExpProc.csv", self.file_stem()))
    }

    pub fn results_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_FullExpResults.csv", self.file_stem()))
    }

    pub fn retest_results_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_GenTestRetestResults.csv", self.file_stem()))
    }

    pub fn instructions_file(&self) -> PathBuf {
        PathBuf::from("InstructStim.csv")
    }

    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(format!("{}_session.log", self.file_stem()))
    }
}

pub trait ConfigStore {
    fn load(&self) -> Result<Config>;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    /// `config.json` in the per-user config dir, or the working directory
    /// when no home directory can be determined.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "easel")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("easel_config.json"))
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// A missing file means defaults; an unreadable one is an error.
    fn load(&self) -> Result<Config> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice::<Config>(&bytes)
            .map_err(|e| SessionError::Config(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn default_path_is_config_json() {
        let path = FileConfigStore::new().path().to_path_buf();
        assert!(path.ends_with("config.json") || path.ends_with("easel_config.json"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("absent.json"));
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"subject_id":"017","condition":"interleaved","input_mode":"pointer",
               "schema":{"timestamp_columns":true},
               "session_markers":{"Day2":"stop"}}"#,
        )
        .unwrap();

        let cfg = FileConfigStore::with_path(&path).load().unwrap();
        assert_eq!(cfg.subject_id, "017");
        assert_eq!(cfg.condition, Condition::Interleaved);
        assert_eq!(cfg.input_mode, InputMode::Pointer);
        assert_eq!(cfg.timeout_secs, 10.0);
        assert!(cfg.schema.subject_columns);
        assert!(cfg.schema.timestamp_columns);
        assert_eq!(cfg.session_markers.get("Day2"), Some(&MarkerAction::Stop));
        assert_eq!(cfg.results_file(), PathBuf::from("017_IF_FullExpResults.csv"));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_matches!(
            FileConfigStore::with_path(&path).load(),
            Err(SessionError::Config(_))
        );
    }

    #[test]
    fn file_names_follow_condition() {
        let cfg = Config::default();
        assert_eq!(cfg.procedure_file(), PathBuf::from("001_BF_FullExpProc.csv"));
        assert_eq!(cfg.results_file(), PathBuf::from("001_BF_FullExpResults.csv"));
        assert_eq!(
            cfg.retest_results_file(),
            PathBuf::from("001_BF_GenTestRetestResults.csv")
        );
        assert_eq!(cfg.image_root(), PathBuf::from("images"));
    }

    #[test]
    fn validate_rejects_bad_timings() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config {
            timeout_secs: 0.0,
            ..Config::default()
        };
        assert_matches!(cfg.validate(), Err(SessionError::Config(_)));

        let cfg = Config {
            feedback_delay_secs: f64::NAN,
            ..Config::default()
        };
        assert_matches!(cfg.validate(), Err(SessionError::Config(_)));

        let cfg = Config {
            subject_id: " ".into(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn input_mode_key_maps() {
        assert_eq!(InputMode::Pointer.response_keys(), None);
        assert_eq!(
            InputMode::ButtonBoxA.response_keys(),
            Some(['8', '7', '6', '1', '2', '3'])
        );
        assert_eq!(InputMode::ButtonBoxB.response_keys().unwrap()[3], 'j');
        assert_eq!(InputMode::Pointer.columns(), 3);
        assert_eq!(InputMode::ButtonBoxB.columns(), 6);
    }
}
