use crate::error::{Result, SessionError};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// How an `instruct` row picks its screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSource {
    /// The n-th instruction row shows the n-th screen.
    #[default]
    Running,
    /// The row's instruction-reference column names the screen.
    Reference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionScreen {
    pub image: PathBuf,
    pub name: Option<String>,
}

/// Instruction image list: a header row, then `path[,name]` per screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionIndex {
    source_name: String,
    screens: Vec<InstructionScreen>,
}

impl InstructionIndex {
    pub fn load<P: AsRef<Path>>(path: P, image_root: &Path) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file, &path.display().to_string(), image_root)
    }

    pub fn from_reader<R: Read>(reader: R, source_name: &str, image_root: &Path) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut screens = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let image = record.get(0).map(str::trim).unwrap_or("");
            if image.is_empty() {
                return Err(SessionError::malformed(
                    source_name,
                    line,
                    "instruction row has no image path",
                ));
            }
            let name = record
                .get(1)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);

            screens.push(InstructionScreen {
                image: image_root.join(image),
                name,
            });
        }

        Ok(Self {
            source_name: source_name.to_string(),
            screens,
        })
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    /// Zero-based position among the screens (header excluded).
    pub fn by_position(&self, position: usize) -> Option<&InstructionScreen> {
        self.screens.get(position)
    }

    /// A numeric reference is a zero-based position, anything else a screen name.
    pub fn by_reference(&self, reference: &str) -> Option<&InstructionScreen> {
        let reference = reference.trim();
        match reference.parse::<usize>() {
            Ok(position) => self.by_position(position),
            Err(_) => self
                .screens
                .iter()
                .find(|s| s.name.as_deref() == Some(reference)),
        }
    }

    /// Resolve the screen for an instruction row.
    pub fn resolve(
        &self,
        source: InstructionSource,
        shown_so_far: usize,
        reference: &str,
    ) -> Result<&InstructionScreen> {
        let (screen, wanted) = match source {
            InstructionSource::Running => (self.by_position(shown_so_far), shown_so_far.to_string()),
            InstructionSource::Reference => (self.by_reference(reference), reference.to_string()),
        };
        screen.ok_or_else(|| SessionError::InstructionNotFound {
            source_name: self.source_name.clone(),
            reference: wanted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn index(body: &str) -> Result<InstructionIndex> {
        let text = format!("Path,Name\n{body}");
        InstructionIndex::from_reader(text.as_bytes(), "InstructStim.csv", Path::new("images"))
    }

    #[test]
    fn test_load_resolves_against_image_root() {
        let idx = index("welcome.png,welcome\nstudy.png\n").unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(
            idx.by_position(0).unwrap().image,
            Path::new("images").join("welcome.png")
        );
        assert_eq!(idx.by_position(1).unwrap().name, None);
    }

    #[test]
    fn test_by_reference_numeric_or_name() {
        let idx = index("welcome.png,welcome\nstudy.png,study\n").unwrap();
        assert_eq!(
            idx.by_reference("1").unwrap().name.as_deref(),
            Some("study")
        );
        assert_eq!(
            idx.by_reference(" welcome ").unwrap().image,
            Path::new("images").join("welcome.png")
        );
        assert!(idx.by_reference("7").is_none());
        assert!(idx.by_reference("missing").is_none());
    }

    #[test]
    fn test_resolve_by_source() {
        let idx = index("a.png,first\nb.png,second\n").unwrap();
        let screen = idx.resolve(InstructionSource::Running, 1, "first").unwrap();
        assert_eq!(screen.name.as_deref(), Some("second"));

        let screen = idx.resolve(InstructionSource::Reference, 1, "first").unwrap();
        assert_eq!(screen.name.as_deref(), Some("first"));

        assert_matches!(
            idx.resolve(InstructionSource::Running, 2, ""),
            Err(SessionError::InstructionNotFound { .. })
        );
    }

    #[test]
    fn test_empty_path_is_malformed() {
        assert_matches!(
            index("a.png\n,orphan\n"),
            Err(SessionError::MalformedInput { line: 3, .. })
        );
    }
}
