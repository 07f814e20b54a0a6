use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use regex::Regex;

use crate::{
    error::{ABCErr, ABCResult},
    Generation,
};

use super::Storage;

/// Generations saved as `gen_NNN.json` files in one directory.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct FileSystem {
    base_path: PathBuf,
}
impl FileSystem {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn gen_file_path(&self, number: u32) -> PathBuf {
        self.base_path.join(format!("gen_{:03}.json", number))
    }
}

/// Reads a single checkpoint file.
pub fn load_generation_file<P: AsRef<Path>>(path: P) -> ABCResult<Generation> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let gen: Generation = serde_json::from_reader(reader)?;
    Ok(gen)
}

impl Storage for FileSystem {
    fn previous_gen_number(&self) -> ABCResult<Option<u32>> {
        if !self.base_path.exists() {
            return Ok(None);
        }

        let re = Regex::new(r#"^gen_(?P<gid>\d+)\.json$"#)?;
        let mut gen_numbers = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let file_name = entry?.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(caps) = re.captures(&file_name) {
                match caps["gid"].parse::<u32>() {
                    Ok(number) => gen_numbers.push(number),
                    Err(e) => log::warn!("Skipping {}, not a generation number: {}", file_name, e),
                }
            }
        }

        Ok(gen_numbers.into_iter().max())
    }

    fn load_gen(&self, number: u32) -> ABCResult<Generation> {
        let file_path = self.gen_file_path(number);
        if !file_path.exists() {
            return Err(ABCErr::StorageError(format!(
                "No generation file at {:?}",
                file_path
            )));
        }
        load_generation_file(file_path)
    }

    fn save_new_gen(&self, gen: &Generation) -> ABCResult<()> {
        std::fs::create_dir_all(&self.base_path)?;
        let file_path = self.gen_file_path(gen.number);

        match file_path.exists() {
            false => {
                let serialised_gen = serde_json::to_string_pretty(&gen)?;
                std::fs::write(&file_path, serialised_gen)?;
                log::info!("Saved generation {} to {:?}", gen.number, file_path);
                Ok(())
            }
            true => Err(ABCErr::StorageError(format!(
                "Gen file already existed at {:?}",
                file_path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_helper::make_dummy_generation;

    use super::*;

    #[test]
    fn no_gen_files() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        std::fs::write(tmp_dir.path().join("notes.txt"), "not a generation")?;

        let storage = FileSystem::new(tmp_dir.path().to_path_buf());
        assert_eq!(None, storage.previous_gen_number()?);
        assert_eq!(None, storage.load_previous_gen()?);

        let missing = FileSystem::new(tmp_dir.path().join("never_created"));
        assert_eq!(None, missing.previous_gen_number()?);
        Ok(())
    }

    #[test]
    fn save_and_load_latest_gen() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        let storage = FileSystem::new(tmp_dir.path().join("fit"));

        storage.save_new_gen(&make_dummy_generation(0))?;
        storage.save_new_gen(&make_dummy_generation(2))?;
        storage.save_new_gen(&make_dummy_generation(11))?;

        assert_eq!(Some(11), storage.previous_gen_number()?);
        assert_eq!(Some(make_dummy_generation(11)), storage.load_previous_gen()?);
        assert_eq!(make_dummy_generation(2), storage.load_gen(2)?);
        assert!(tmp_dir.path().join("fit").join("gen_011.json").exists());
        Ok(())
    }

    #[test]
    fn out_of_range_gen_file_is_skipped() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        let storage = FileSystem::new(tmp_dir.path().to_path_buf());
        storage.save_new_gen(&make_dummy_generation(3))?;
        std::fs::write(tmp_dir.path().join("gen_99999999999.json"), "{}")?;

        assert_eq!(Some(3), storage.previous_gen_number()?);
        assert_eq!(Some(make_dummy_generation(3)), storage.load_previous_gen()?);
        Ok(())
    }

    #[test]
    fn wide_gen_numbers_are_found() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        let storage = FileSystem::new(tmp_dir.path().to_path_buf());
        storage.save_new_gen(&make_dummy_generation(999))?;
        storage.save_new_gen(&make_dummy_generation(70000))?;

        assert_eq!(Some(70000), storage.previous_gen_number()?);
        assert!(tmp_dir.path().join("gen_70000.json").exists());
        Ok(())
    }

    #[test]
    fn refuse_to_overwrite_a_gen() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        let storage = FileSystem::new(tmp_dir.path().to_path_buf());

        storage.save_new_gen(&make_dummy_generation(3))?;
        match storage.save_new_gen(&make_dummy_generation(3)) {
            Err(ABCErr::StorageError(_)) => Ok(()),
            other => panic!("Expected storage error, got {:?}", other),
        }
    }

    #[test]
    fn missing_gen_is_an_error() -> ABCResult<()> {
        let tmp_dir = tempfile::tempdir()?;
        let storage = FileSystem::new(tmp_dir.path().to_path_buf());

        assert!(matches!(storage.load_gen(4), Err(ABCErr::StorageError(_))));
        Ok(())
    }
}
