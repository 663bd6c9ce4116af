//! Parses `-c <contents-file>`'s initial parameter values (§6 "Process interface") into
//! `ParameterMap`s ready to seed a freshly opened [`crate::store::Store`].
use std::collections::HashMap;
use std::fs;
use std::io;

use serde_derive::Deserialize;

use mink_gdt::service::{ParamValue, ParameterMap};

#[derive(Deserialize)]
struct SeedFile {
    entries: Vec<SeedEntry>,
}

#[derive(Deserialize)]
struct SeedEntry {
    path: String,
    param_id: u32,
    value: SeedValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum SeedValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Utf8(String),
}

impl From<SeedValue> for ParamValue {
    fn from(value: SeedValue) -> ParamValue {
        match value {
            SeedValue::Bool(v) => ParamValue::Bool(v),
            SeedValue::I32(v) => ParamValue::I32(v),
            SeedValue::U32(v) => ParamValue::U32(v),
            SeedValue::I64(v) => ParamValue::I64(v),
            SeedValue::U64(v) => ParamValue::U64(v),
            SeedValue::Utf8(v) => ParamValue::Utf8(v),
        }
    }
}

/// Read and group `path`'s seed entries into one `ParameterMap` per config path.
pub fn load(path: &str) -> io::Result<Vec<(String, ParameterMap)>> {
    let raw = fs::read_to_string(path)?;
    let seed: SeedFile =
        serde_json::from_str(&raw).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let mut by_path: HashMap<String, ParameterMap> = HashMap::new();
    for entry in seed.entries {
        by_path
            .entry(entry.path)
            .or_insert_with(ParameterMap::new)
            .set(entry.param_id, entry.value.into(), 0, 0);
    }
    Ok(by_path.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_groups_entries_by_path() {
        let mut file = tempfile_with(
            r#"{
                "entries": [
                    {"path": "/net/hostname", "param_id": 1, "value": {"utf8": "router-1"}},
                    {"path": "/net/hostname", "param_id": 2, "value": {"u32": 1500}},
                    {"path": "/net/enabled", "param_id": 1, "value": {"bool": true}}
                ]
            }"#,
        );

        let loaded = load(file.path_str()).unwrap();
        assert_eq!(loaded.len(), 2);

        let hostname_entry = loaded.iter().find(|(path, _)| path == "/net/hostname").unwrap();
        assert_eq!(hostname_entry.1.len(), 2);
        file.cleanup();
    }

    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn path_str(&self) -> &str {
            self.path.to_str().unwrap()
        }

        fn cleanup(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(contents: &str) -> TempFile {
        let path = std::env::temp_dir().join(format!("mink-configd-seed-test-{:?}.json", std::thread::current().id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        TempFile { path }
    }
}
