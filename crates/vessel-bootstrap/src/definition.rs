//! Bootstrap definition parser.
//!
//! The file is parsed fully at `open`: a header block of case-sensitive
//! `Key: value` lines, then `%name` section markers whose bodies are the
//! verbatim text up to the next marker. Sequential lookup uses an
//! explicit cursor: [`section_get`](BootstrapDefinition::section_get)
//! returns the first match at or after the cursor and advances past it;
//! [`rewind`](BootstrapDefinition::rewind) resets it for a fresh scan.
//!
//! Lines before the first section that are neither blank, comments, nor
//! `Key: value` pairs are ignored with a warning — legacy V1 files carry
//! arbitrary content there, and V1 detection must still succeed on them.

use std::path::{Path, PathBuf};

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while, take_while1},
    combinator::all_consuming,
    sequence::preceded,
};
use vessel_common::constants;
use vessel_common::error::{Result, VesselError};

/// Definition format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionVersion {
    /// Legacy format, routed to the external V1 driver.
    V1,
    /// Module-discriminated format handled by the engine.
    V2,
}

/// A named script block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name without the `%` marker.
    pub name: String,
    /// Verbatim body text between this marker and the next.
    pub body: String,
}

/// A fully parsed bootstrap definition.
#[derive(Debug)]
pub struct BootstrapDefinition {
    path: PathBuf,
    header: Vec<(String, String)>,
    sections: Vec<Section>,
    cursor: usize,
}

impl BootstrapDefinition {
    /// Reads and parses the definition file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let (header, sections) = parse(&text);
        tracing::debug!(
            definition = %path.display(),
            header_keys = header.len(),
            sections = sections.len(),
            "bootstrap definition opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            header,
            sections,
            cursor: 0,
        })
    }

    /// Builds a definition from in-memory text, for callers that already
    /// hold the source.
    #[must_use]
    pub fn from_text(path: &Path, text: &str) -> Self {
        let (header, sections) = parse(text);
        Self {
            path: path.to_path_buf(),
            header,
            sections,
            cursor: 0,
        }
    }

    /// Path of the definition file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Case-sensitive header lookup; first occurrence wins.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body of the first section named `name` at or after the
    /// cursor and advances the cursor past it.
    ///
    /// `None` means not-found from the cursor onward — distinct from a
    /// present section with an empty body, which returns `Some("")`. The
    /// cursor is left unchanged on a miss; callers that need a
    /// deterministic match from the top should [`rewind`](Self::rewind)
    /// first.
    pub fn section_get(&mut self, name: &str) -> Option<&str> {
        let index = self
            .sections
            .iter()
            .skip(self.cursor)
            .position(|s| s.name == name)
            .map(|offset| self.cursor + offset)?;
        self.cursor = index + 1;
        Some(&self.sections[index].body)
    }

    /// Resets the cursor so a previously exhausted lookup succeeds again.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// `V2` when the header carries the `Bootstrap` module key, `V1`
    /// otherwise.
    #[must_use]
    pub fn version(&self) -> DefinitionVersion {
        if self.get_value(constants::BOOTSTRAP_KEY).is_some() {
            DefinitionVersion::V2
        } else {
            DefinitionVersion::V1
        }
    }

    /// Releases the parsed state.
    pub fn close(self) {
        tracing::debug!(definition = %self.path.display(), "bootstrap definition closed");
    }
}

/// `%name` marker line, optionally with trailing whitespace.
fn section_marker(line: &str) -> IResult<&str, &str> {
    let marker = preceded(
        tag("%"),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'),
    );
    all_consuming((marker, take_while(|c: char| c == ' ' || c == '\t')))
        .parse(line)
        .map(|(rest, (name, _))| (rest, name))
}

/// `Key: value` header line.
fn header_pair(line: &str) -> IResult<&str, (&str, &str)> {
    let key = take_while1(|c: char| c != ':' && c != '\n');
    let value = take_while(|c: char| c != '\n');
    all_consuming((key, tag(":"), value))
        .parse(line)
        .map(|(rest, (k, _, v))| (rest, (k.trim(), v.trim())))
}

/// Splits source text into header pairs and sections with verbatim
/// bodies.
fn parse(text: &str) -> (Vec<(String, String)>, Vec<Section>) {
    let mut header = Vec::new();
    let mut sections: Vec<Section> = Vec::new();
    // (name, body start offset) of the section currently being read.
    let mut current: Option<(String, usize)> = None;

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end_matches('\n');

        if let Ok((_, name)) = section_marker(trimmed) {
            if let Some((open_name, body_start)) = current.take() {
                sections.push(Section {
                    name: open_name,
                    body: text[body_start..line_start].to_string(),
                });
            }
            current = Some((name.to_string(), offset));
            continue;
        }

        if current.is_some() {
            // Body text is preserved byte-for-byte; nothing to do here.
            continue;
        }

        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        if let Ok((_, (key, value))) = header_pair(trimmed) {
            header.push((key.to_string(), value.to_string()));
        } else {
            tracing::warn!(line = trimmed, "ignoring unrecognized header line");
        }
    }

    if let Some((open_name, body_start)) = current {
        sections.push(Section {
            name: open_name,
            body: text[body_start..].to_string(),
        });
    }

    (header, sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(text: &str) -> BootstrapDefinition {
        BootstrapDefinition::from_text(Path::new("/defs/box.def"), text)
    }

    const FULL: &str = "\
Bootstrap: busybox
MirrorURL: https://example.invalid/busybox

%pre
echo host-side
%post
echo in-container
apk add curl
%runscript
exec /bin/sh \"$@\"
";

    #[test]
    fn header_values_are_case_sensitive() {
        let def = definition(FULL);
        assert_eq!(def.get_value("Bootstrap"), Some("busybox"));
        assert_eq!(def.get_value("bootstrap"), None);
        assert_eq!(def.get_value("MirrorURL"), Some("https://example.invalid/busybox"));
    }

    #[test]
    fn version_v2_with_bootstrap_key() {
        assert_eq!(definition(FULL).version(), DefinitionVersion::V2);
    }

    #[test]
    fn version_v1_without_bootstrap_key() {
        let def = definition("DISTRO=centos\nsome legacy line\n");
        assert_eq!(def.version(), DefinitionVersion::V1);
    }

    #[test]
    fn section_bodies_are_verbatim() {
        let mut def = definition(FULL);
        assert_eq!(def.section_get("pre"), Some("echo host-side\n"));
        assert_eq!(
            def.section_get("post"),
            Some("echo in-container\napk add curl\n")
        );
        assert_eq!(def.section_get("runscript"), Some("exec /bin/sh \"$@\"\n"));
    }

    #[test]
    fn absent_section_is_not_found() {
        let mut def = definition(FULL);
        assert_eq!(def.section_get("setup"), None);
    }

    #[test]
    fn cursor_advances_monotonically() {
        let mut def = definition(FULL);
        assert!(def.section_get("pre").is_some());
        assert_eq!(def.section_get("pre"), None);
    }

    #[test]
    fn rewind_restores_exhausted_lookup() {
        let mut def = definition(FULL);
        let first = def.section_get("pre").map(String::from);
        assert_eq!(def.section_get("pre"), None);
        def.rewind();
        assert_eq!(def.section_get("pre").map(String::from), first);
    }

    #[test]
    fn repeated_section_returns_first_from_cursor() {
        let text = "%post\necho one\n%post\necho two\n";
        let mut def = definition(text);
        assert_eq!(def.section_get("post"), Some("echo one\n"));
        assert_eq!(def.section_get("post"), Some("echo two\n"));
        assert_eq!(def.section_get("post"), None);
    }

    #[test]
    fn empty_section_is_present_not_missing() {
        let mut def = definition("Bootstrap: arch\n%setup\n%post\necho hi\n");
        assert_eq!(def.section_get("setup"), Some(""));
    }

    #[test]
    fn section_without_trailing_newline() {
        let mut def = definition("%runscript\nexec /bin/true");
        assert_eq!(def.section_get("runscript"), Some("exec /bin/true"));
    }

    #[test]
    fn comments_and_blanks_ignored_in_header_only() {
        let text = "# definition\n\nBootstrap: yum\n%post\n# kept in body\necho hi\n";
        let mut def = definition(text);
        assert_eq!(def.get_value("Bootstrap"), Some("yum"));
        assert_eq!(def.section_get("post"), Some("# kept in body\necho hi\n"));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = BootstrapDefinition::open(Path::new("/nonexistent/box.def"))
            .expect_err("should fail");
        assert!(matches!(err, VesselError::Io { .. }));
    }

    #[test]
    fn open_reads_from_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("box.def");
        std::fs::write(&path, FULL).expect("write");
        let def = BootstrapDefinition::open(&path).expect("open");
        assert_eq!(def.version(), DefinitionVersion::V2);
        assert_eq!(def.path(), path);
        def.close();
    }
}
