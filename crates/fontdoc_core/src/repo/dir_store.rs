use super::store::{EntryKind, FontStore, LayerContents, ModTime, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const META_INFO_FILE: &str = "metainfo.json";
const LAYER_CONTENTS_FILE: &str = "layercontents.json";
const DEFAULT_LAYER_DIR: &str = "glyphs";
const GLYPH_FILE_SUFFIX: &str = ".json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaInfo {
    format_version: u32,
    creator: String,
}

/// Store backed by a directory tree.
///
/// Layout: `metainfo.json`, singleton records at the root, `data/` and
/// `images/` subtrees, and one glyph directory per layer listed in
/// `layercontents.json`. The default layer lives in `glyphs/`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
    format_version: u32,
}

impl DirStore {
    /// Creates (or reuses) `root` and records `format_version`.
    pub fn create(root: impl Into<PathBuf>, format_version: u32) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let info = MetaInfo {
            format_version,
            creator: concat!("fontdoc ", env!("CARGO_PKG_VERSION")).to_string(),
        };
        fs::write(root.join(META_INFO_FILE), encode_json(&info)?)?;
        Ok(Self {
            root,
            format_version,
        })
    }

    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let bytes = fs::read(root.join(META_INFO_FILE)).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::InvalidData(format!("missing {META_INFO_FILE} in {}", root.display()))
            } else {
                StoreError::Io(err)
            }
        })?;
        let info: MetaInfo = decode_json(&bytes)?;
        Ok(Self {
            root,
            format_version: info.format_version,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_layer_table(&self) -> StoreResult<Vec<(String, String)>> {
        match fs::read(self.root.join(LAYER_CONTENTS_FILE)) {
            Ok(bytes) => decode_json(&bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_layer_table(&self, table: &[(String, String)]) -> StoreResult<()> {
        fs::write(self.root.join(LAYER_CONTENTS_FILE), encode_json(&table)?)?;
        Ok(())
    }

    fn layer_dir(&self, layer: &str) -> StoreResult<Option<PathBuf>> {
        Ok(self
            .read_layer_table()?
            .into_iter()
            .find(|(name, _)| name == layer)
            .map(|(_, dir)| self.root.join(dir)))
    }

    fn entry_path(&self, kind: &EntryKind, name: &str) -> StoreResult<Option<PathBuf>> {
        match kind {
            EntryKind::Glyphs(layer) => Ok(self
                .layer_dir(layer)?
                .map(|dir| dir.join(format!("{}{GLYPH_FILE_SUFFIX}", escape_name(name))))),
            EntryKind::Meta => Ok(Some(self.root.join(checked_relative(name)?))),
            EntryKind::Data => Ok(Some(self.root.join("data").join(checked_relative(name)?))),
            EntryKind::Images => Ok(Some(
                self.root.join("images").join(checked_relative(name)?),
            )),
        }
    }

    fn require_entry_path(&self, kind: &EntryKind, name: &str) -> StoreResult<PathBuf> {
        match kind {
            EntryKind::Glyphs(layer) => self
                .entry_path(kind, name)?
                .ok_or_else(|| StoreError::LayerNotFound(layer.clone())),
            _ => self.entry_path(kind, name)?.ok_or_else(|| not_found(kind, name)),
        }
    }
}

impl FontStore for DirStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn format_version(&self) -> u32 {
        self.format_version
    }

    fn list_entries(&self, kind: &EntryKind) -> StoreResult<BTreeSet<String>> {
        match kind {
            EntryKind::Glyphs(layer) => {
                let Some(dir) = self.layer_dir(layer)? else {
                    return Ok(BTreeSet::new());
                };
                let mut names = BTreeSet::new();
                for file in list_files(&dir)? {
                    if let Some(stem) = file.strip_suffix(GLYPH_FILE_SUFFIX) {
                        if let Some(name) = unescape_name(stem) {
                            names.insert(name);
                        }
                    }
                }
                Ok(names)
            }
            EntryKind::Meta => Ok(list_files(&self.root)?
                .into_iter()
                .filter(|file| file != META_INFO_FILE && file != LAYER_CONTENTS_FILE)
                .collect()),
            EntryKind::Data => list_tree(&self.root.join("data")),
            EntryKind::Images => list_tree(&self.root.join("images")),
        }
    }

    fn read_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<Vec<u8>> {
        let Some(path) = self.entry_path(kind, name)? else {
            return Err(not_found(kind, name));
        };
        fs::read(path).map_err(|err| map_missing(err, kind, name))
    }

    fn mod_time(&self, kind: &EntryKind, name: &str) -> StoreResult<Option<ModTime>> {
        let Some(path) = self.entry_path(kind, name)? else {
            return Ok(None);
        };
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(ModTime::from(metadata.modified()?))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_entry(&self, kind: &EntryKind, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.require_entry_path(kind, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn remove_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<()> {
        let path = self.require_entry_path(kind, name)?;
        fs::remove_file(path).map_err(|err| map_missing(err, kind, name))
    }

    fn layer_contents(&self) -> StoreResult<LayerContents> {
        let table = self.read_layer_table()?;
        Ok(LayerContents {
            default: table
                .iter()
                .find(|(_, dir)| dir == DEFAULT_LAYER_DIR)
                .map(|(name, _)| name.clone()),
            order: table.into_iter().map(|(name, _)| name).collect(),
        })
    }

    fn ensure_layer(&self, name: &str, default: bool) -> StoreResult<()> {
        let mut table = self.read_layer_table()?;
        if let Some((_, dir)) = table.iter().find(|(layer, _)| layer == name) {
            if (dir == DEFAULT_LAYER_DIR) != default {
                return self.set_layer_default(name, default);
            }
            return Ok(());
        }

        let dir = if default {
            if let Some((occupant, _)) = table.iter().find(|(_, dir)| dir == DEFAULT_LAYER_DIR) {
                return Err(StoreError::LayerExists(occupant.clone()));
            }
            DEFAULT_LAYER_DIR.to_string()
        } else {
            non_default_dir(name)
        };
        fs::create_dir_all(self.root.join(&dir))?;
        table.push((name.to_owned(), dir));
        self.write_layer_table(&table)
    }

    fn write_layer_order(&self, order: &[String]) -> StoreResult<()> {
        let table = self.read_layer_table()?;
        let mut reordered = Vec::with_capacity(table.len());
        for name in order {
            let entry = table
                .iter()
                .find(|(layer, _)| layer == name)
                .ok_or_else(|| StoreError::LayerNotFound(name.clone()))?;
            reordered.push(entry.clone());
        }
        for entry in &table {
            if !reordered.contains(entry) {
                reordered.push(entry.clone());
            }
        }
        if reordered != table {
            self.write_layer_table(&reordered)?;
        }
        Ok(())
    }

    fn remove_layer(&self, name: &str) -> StoreResult<()> {
        let mut table = self.read_layer_table()?;
        let position = table
            .iter()
            .position(|(layer, _)| layer == name)
            .ok_or_else(|| StoreError::LayerNotFound(name.to_owned()))?;
        let (_, dir) = table.remove(position);
        match fs::remove_dir_all(self.root.join(dir)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.write_layer_table(&table)
    }

    fn rename_layer(&self, old: &str, new: &str) -> StoreResult<()> {
        let mut table = self.read_layer_table()?;
        if table.iter().any(|(layer, _)| layer == new) {
            return Err(StoreError::LayerExists(new.to_owned()));
        }
        let position = table
            .iter()
            .position(|(layer, _)| layer == old)
            .ok_or_else(|| StoreError::LayerNotFound(old.to_owned()))?;
        if table[position].1 != DEFAULT_LAYER_DIR {
            let dir = non_default_dir(new);
            move_dir(&self.root.join(&table[position].1), &self.root.join(&dir))?;
            table[position].1 = dir;
        }
        table[position].0 = new.to_owned();
        self.write_layer_table(&table)
    }

    fn set_layer_default(&self, name: &str, default: bool) -> StoreResult<()> {
        let mut table = self.read_layer_table()?;
        let position = table
            .iter()
            .position(|(layer, _)| layer == name)
            .ok_or_else(|| StoreError::LayerNotFound(name.to_owned()))?;
        let target = if default {
            DEFAULT_LAYER_DIR.to_string()
        } else {
            non_default_dir(name)
        };
        if table[position].1 == target {
            return Ok(());
        }
        if default {
            if let Some((occupant, _)) = table.iter().find(|(_, dir)| dir == DEFAULT_LAYER_DIR) {
                return Err(StoreError::LayerExists(occupant.clone()));
            }
        }
        move_dir(&self.root.join(&table[position].1), &self.root.join(&target))?;
        table[position].1 = target;
        self.write_layer_table(&table)
    }
}

fn encode_json<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn decode_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn not_found(kind: &EntryKind, name: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.clone(),
        name: name.to_owned(),
    }
}

fn map_missing(err: std::io::Error, kind: &EntryKind, name: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        not_found(kind, name)
    } else {
        StoreError::Io(err)
    }
}

/// Rejects names that would escape their subtree.
fn checked_relative(name: &str) -> StoreResult<&Path> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && !name.contains('\\')
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(StoreError::InvalidData(format!("illegal entry name `{name}`")))
    }
}

fn move_dir(from: &Path, to: &Path) -> StoreResult<()> {
    if from.exists() {
        fs::rename(from, to)?;
    } else {
        fs::create_dir_all(to)?;
    }
    Ok(())
}

fn non_default_dir(layer: &str) -> String {
    format!("{DEFAULT_LAYER_DIR}.{}", escape_name(layer))
}

fn list_files(dir: &Path) -> StoreResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_owned());
            }
        }
    }
    Ok(files)
}

/// Relative `/`-separated paths of every file below `dir`.
fn list_tree(dir: &Path) -> StoreResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut pending = vec![(dir.to_path_buf(), String::new())];
    while let Some((current, prefix)) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let relative = format!("{prefix}{file_name}");
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), format!("{relative}/")));
            } else {
                names.insert(relative);
            }
        }
    }
    Ok(names)
}

/// Case-insensitive-safe, reversible file stem for a glyph or layer name.
///
/// Lowercase letters, digits and `-` are kept, `.` is kept unless leading,
/// uppercase letters become `_` + lowercase, everything else is `%XX`.
pub(crate) fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (index, ch) in name.chars().enumerate() {
        match ch {
            'a'..='z' | '0'..='9' | '-' => out.push(ch),
            '.' if index > 0 => out.push(ch),
            'A'..='Z' => {
                out.push('_');
                out.push(ch.to_ascii_lowercase());
            }
            _ => {
                let mut buf = [0_u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "%{byte:02X}");
                }
            }
        }
    }
    out
}

pub(crate) fn unescape_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'_' => {
                out.push(bytes.get(index + 1)?.to_ascii_uppercase());
                index += 2;
            }
            b'%' => {
                let hex = stem.get(index + 1..index + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                index += 3;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
