//! Sound-event catalog
//!
//! Loads the JSON metadata catalog from the system data directory, merges
//! the user catalog over it at whole-entry granularity, and exposes a typed
//! read-only view. Per-play resolution (file choice, multiplier merging,
//! fade defaults) also lives here so the rest of the daemon never touches
//! raw JSON.

use crate::error::CatalogError;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const DEFAULT_VOLUME: f64 = 1.0;
const DEFAULT_PITCH: f64 = 1.0;
const DEFAULT_RATE: f64 = 1.0;
const DEFAULT_LOOP_FADE_MS: u64 = 1000;

/// Sound classification: one-shot effect or background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    Sfx,
    Bg,
}

/// Catalog-level policy for repeated plays of the same event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapBehavior {
    Overlap,
    Restart,
    Ignore,
}

/// Raw catalog entry as found in metadata.json
///
/// Unknown options are ignored. `sound-file` and `sound-files` are merged;
/// everything else is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntry {
    #[serde(default, rename = "sound-file")]
    pub sound_file: Option<String>,
    #[serde(default, rename = "sound-files")]
    pub sound_files: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, rename = "loop")]
    pub looping: Option<bool>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default, rename = "fade-in")]
    pub fade_in: Option<u64>,
    #[serde(default, rename = "fade-out")]
    pub fade_out: Option<u64>,
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default, rename = "overlap-behavior")]
    pub overlap_behavior: Option<String>,
    #[serde(default, rename = "apply-state-on")]
    pub apply_state_on: Option<ApplyStateOn>,
}

/// States applied to other live sounds when an event starts
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplyStateOn {
    #[serde(default)]
    pub pause: Vec<String>,
    #[serde(default)]
    pub silence: Vec<String>,
}

/// A catalog entry with its sound files resolved to absolute paths
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    raw: RawEntry,
    sound_files: Vec<PathBuf>,
}

impl CatalogEntry {
    fn new(raw: RawEntry, sounds_dir: &Path) -> Self {
        let mut names: Vec<&String> = raw.sound_files.iter().collect();
        if let Some(single) = raw.sound_file.as_ref() {
            names.push(single);
        }
        names.sort();
        names.dedup();
        let sound_files = names.into_iter().map(|n| sounds_dir.join(n)).collect();
        Self { raw, sound_files }
    }

    pub fn sound_files(&self) -> &[PathBuf] {
        &self.sound_files
    }

    pub fn kind(&self) -> SoundKind {
        match self.raw.kind.as_deref() {
            Some("bg") => SoundKind::Bg,
            // Anything unrecognized is treated as a plain effect.
            _ => SoundKind::Sfx,
        }
    }

    pub fn looping(&self) -> bool {
        self.raw.looping.unwrap_or(false)
    }

    /// Overlap policy, or the offending value when unrecognized
    pub fn overlap_behavior(&self) -> Result<OverlapBehavior, CatalogError> {
        match self.raw.overlap_behavior.as_deref() {
            None | Some("overlap") => Ok(OverlapBehavior::Overlap),
            Some("restart") => Ok(OverlapBehavior::Restart),
            Some("ignore") => Ok(OverlapBehavior::Ignore),
            Some(other) => Err(CatalogError::UnknownOverlapBehavior {
                value: other.to_string(),
            }),
        }
    }

    pub fn apply_state_on(&self) -> Option<&ApplyStateOn> {
        self.raw.apply_state_on.as_ref()
    }

    /// Resolve this entry into a concrete playback profile
    ///
    /// Picks one sound file uniformly at random and merges the per-request
    /// multipliers into the catalog ones (null × x = x).
    pub fn resolve(
        &self,
        sound_event_id: &str,
        extras: &PlayOptions,
    ) -> Result<SoundProfile, CatalogError> {
        let location = self
            .sound_files
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| CatalogError::NoSoundFiles {
                sound_event_id: sound_event_id.to_string(),
            })?;

        let looping = self.looping();
        let loop_default = if looping { DEFAULT_LOOP_FADE_MS } else { 0 };

        Ok(SoundProfile {
            location,
            volume: multiply(self.raw.volume, extras.volume).unwrap_or(DEFAULT_VOLUME),
            pitch: multiply(self.raw.pitch, extras.pitch).unwrap_or(DEFAULT_PITCH),
            rate: multiply(self.raw.rate, extras.rate).unwrap_or(DEFAULT_RATE),
            fade_in_ms: self.raw.fade_in.unwrap_or(loop_default),
            fade_out_ms: self.raw.fade_out.unwrap_or(loop_default),
            delay_ms: self.raw.delay.unwrap_or(0),
            looping,
            kind: self.kind(),
        })
    }
}

/// Multipliers a client may attach to PlayFull
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayOptions {
    pub volume: Option<f64>,
    pub pitch: Option<f64>,
    pub rate: Option<f64>,
}

fn multiply(base: Option<f64>, extra: Option<f64>) -> Option<f64> {
    match (base, extra) {
        (Some(b), Some(e)) => Some(b * e),
        (Some(b), None) => Some(b),
        (None, Some(e)) => Some(e),
        (None, None) => None,
    }
}

/// Fully resolved playback parameters for one live sound
#[derive(Debug, Clone, PartialEq)]
pub struct SoundProfile {
    pub location: PathBuf,
    pub volume: f64,
    pub pitch: f64,
    pub rate: f64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    pub delay_ms: u64,
    pub looping: bool,
    pub kind: SoundKind,
}

impl SoundProfile {
    /// The single speed multiplier handed to the audio driver
    pub fn speed(&self) -> f64 {
        self.pitch * self.rate
    }
}

/// Read-only dictionary from sound event id to catalog entry
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// Load and merge the system and user catalogs
    ///
    /// The user catalog overrides the system one at whole-entry granularity.
    /// A missing system catalog is an error-level diagnostic, a missing user
    /// catalog is expected.
    pub fn load(system_data_dir: &Path, user_data_dir: Option<&Path>) -> Self {
        let mut entries = load_one(system_data_dir, Tier::System);
        if let Some(user_dir) = user_data_dir {
            entries.extend(load_one(user_dir, Tier::User));
        }
        info!("Loaded catalog with {} sound events", entries.len());
        Self { entries }
    }

    /// Build a catalog directly from raw entries, for tests and tooling
    pub fn from_entries(sounds_dir: &Path, raw: HashMap<String, RawEntry>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(id, entry)| (id, CatalogEntry::new(entry, sounds_dir)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, sound_event_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(sound_event_id)
    }

    pub fn contains(&self, sound_event_id: &str) -> bool {
        self.entries.contains_key(sound_event_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate every entry, reporting problems as error diagnostics
    ///
    /// Returns the number of problems found. Used by `--check-metadata`.
    pub fn check(&self) -> usize {
        let mut problems = 0;
        let mut ids: Vec<&String> = self.entries.keys().collect();
        ids.sort();
        for id in ids {
            let entry = &self.entries[id];
            if entry.sound_files.is_empty() {
                error!(sound_event_id = %id, "Entry has no sound files");
                problems += 1;
            }
            for file in &entry.sound_files {
                if !file.exists() {
                    error!(sound_event_id = %id, file = %file.display(), "Sound file does not exist");
                    problems += 1;
                }
            }
            if let Err(err) = entry.overlap_behavior() {
                error!(sound_event_id = %id, "{err}");
                problems += 1;
            }
        }
        problems
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    System,
    User,
}

fn load_one(data_dir: &Path, tier: Tier) -> HashMap<String, CatalogEntry> {
    let metadata_path = data_dir.join("metadata.json");
    let sounds_dir = data_dir.join("sounds");

    let text = match std::fs::read_to_string(&metadata_path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let msg = format!(
                "The metadata file at '{}' does not exist",
                metadata_path.display()
            );
            match tier {
                Tier::System => error!("{msg}"),
                Tier::User => info!("{msg}"),
            }
            return HashMap::new();
        }
        Err(err) => {
            error!(
                "Cannot read metadata file at '{}': {err}",
                metadata_path.display()
            );
            return HashMap::new();
        }
    };

    let raw: HashMap<String, RawEntry> = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(err) => {
            error!(
                "Not possible to decode metadata file at '{}': {err}",
                metadata_path.display()
            );
            return HashMap::new();
        }
    };

    raw.into_iter()
        .map(|(id, entry)| {
            if entry.sound_file.is_none() && entry.sound_files.is_empty() {
                warn!(sound_event_id = %id, "Entry declares no sound files");
            }
            (id, CatalogEntry::new(entry, &sounds_dir))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: &str) -> CatalogEntry {
        let raw: RawEntry = serde_json::from_str(json).unwrap();
        CatalogEntry::new(raw, Path::new("/sounds"))
    }

    #[test]
    fn sound_file_and_sound_files_are_merged() {
        let e = entry(r#"{"sound-file": "a.ogg", "sound-files": ["b.ogg", "a.ogg"]}"#);
        let mut files: Vec<_> = e
            .sound_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        files.sort();
        assert_eq!(files, vec!["/sounds/a.ogg", "/sounds/b.ogg"]);
    }

    #[test]
    fn unknown_type_is_sfx() {
        assert_eq!(entry(r#"{"type": "music"}"#).kind(), SoundKind::Sfx);
        assert_eq!(entry(r#"{"type": "bg"}"#).kind(), SoundKind::Bg);
        assert_eq!(entry(r#"{}"#).kind(), SoundKind::Sfx);
    }

    #[test]
    fn unknown_options_are_ignored() {
        let e = entry(r#"{"sound-file": "a.ogg", "frobnicate": 3}"#);
        assert_eq!(e.sound_files().len(), 1);
    }

    #[test]
    fn overlap_behavior_parses_and_rejects() {
        assert_eq!(
            entry(r#"{}"#).overlap_behavior().unwrap(),
            OverlapBehavior::Overlap
        );
        assert_eq!(
            entry(r#"{"overlap-behavior": "restart"}"#)
                .overlap_behavior()
                .unwrap(),
            OverlapBehavior::Restart
        );
        assert_eq!(
            entry(r#"{"overlap-behavior": "ignore"}"#)
                .overlap_behavior()
                .unwrap(),
            OverlapBehavior::Ignore
        );
        assert!(entry(r#"{"overlap-behavior": "mash"}"#)
            .overlap_behavior()
            .is_err());
    }

    #[test]
    fn loop_fades_default_to_one_second() {
        let e = entry(r#"{"sound-file": "a.ogg", "loop": true}"#);
        let profile = e.resolve("x", &PlayOptions::default()).unwrap();
        assert_eq!(profile.fade_in_ms, 1000);
        assert_eq!(profile.fade_out_ms, 1000);
        assert!(profile.looping);

        let e = entry(r#"{"sound-file": "a.ogg"}"#);
        let profile = e.resolve("x", &PlayOptions::default()).unwrap();
        assert_eq!(profile.fade_in_ms, 0);
        assert_eq!(profile.fade_out_ms, 0);
    }

    #[test]
    fn explicit_fades_override_loop_defaults() {
        let e = entry(r#"{"sound-file": "a.ogg", "loop": true, "fade-out": 250}"#);
        let profile = e.resolve("x", &PlayOptions::default()).unwrap();
        assert_eq!(profile.fade_in_ms, 1000);
        assert_eq!(profile.fade_out_ms, 250);
    }

    #[test]
    fn multipliers_combine_with_extras() {
        let e = entry(r#"{"sound-file": "a.ogg", "volume": 0.5, "rate": 2.0}"#);
        let extras = PlayOptions {
            volume: Some(0.5),
            pitch: Some(1.5),
            rate: None,
        };
        let profile = e.resolve("x", &extras).unwrap();
        assert!((profile.volume - 0.25).abs() < 1e-9);
        // null × x = x
        assert!((profile.pitch - 1.5).abs() < 1e-9);
        assert!((profile.rate - 2.0).abs() < 1e-9);
        assert!((profile.speed() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn resolve_without_files_fails() {
        let e = entry(r#"{}"#);
        assert!(matches!(
            e.resolve("x", &PlayOptions::default()),
            Err(CatalogError::NoSoundFiles { .. })
        ));
    }

    #[test]
    fn user_catalog_overrides_whole_entries() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system");
        let user = dir.path().join("user");
        std::fs::create_dir_all(&system).unwrap();
        std::fs::create_dir_all(&user).unwrap();

        std::fs::write(
            system.join("metadata.json"),
            r#"{
                "ui/click": {"sound-file": "click.ogg", "volume": 0.8},
                "ui/ding": {"sound-file": "ding.ogg"}
            }"#,
        )
        .unwrap();
        std::fs::write(
            user.join("metadata.json"),
            r#"{"ui/click": {"sound-file": "custom.ogg"}}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&system, Some(&user));
        assert_eq!(catalog.len(), 2);

        // Overridden entry loses the system volume: whole-entry granularity.
        let click = catalog.get("ui/click").unwrap();
        assert_eq!(
            click.sound_files(),
            &[user.join("sounds").join("custom.ogg")]
        );
        let profile = click.resolve("ui/click", &PlayOptions::default()).unwrap();
        assert_eq!(profile.volume, 1.0);

        let ding = catalog.get("ui/ding").unwrap();
        assert_eq!(
            ding.sound_files(),
            &[system.join("sounds").join("ding.ogg")]
        );
    }

    #[test]
    fn missing_catalogs_yield_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(&dir.path().join("nope"), None);
        assert!(catalog.is_empty());
    }

    #[test]
    fn check_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = HashMap::new();
        raw.insert(
            "a".to_string(),
            serde_json::from_str::<RawEntry>(r#"{"sound-file": "gone.ogg"}"#).unwrap(),
        );
        raw.insert("b".to_string(), RawEntry::default());
        let catalog = Catalog::from_entries(dir.path(), raw);
        // One missing file, one empty entry.
        assert_eq!(catalog.check(), 2);
    }
}
