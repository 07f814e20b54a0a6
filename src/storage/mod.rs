use crate::{error::ABCResult, Generation};

pub mod config;
pub mod filesystem;

/// Where accepted generations are checkpointed.
pub trait Storage {
    /// Number of the most recently saved generation, if any.
    fn previous_gen_number(&self) -> ABCResult<Option<u32>>;
    fn load_gen(&self, number: u32) -> ABCResult<Generation>;
    /// Fails if a generation with the same number was already saved.
    fn save_new_gen(&self, gen: &Generation) -> ABCResult<()>;

    fn load_previous_gen(&self) -> ABCResult<Option<Generation>> {
        match self.previous_gen_number()? {
            Some(number) => self.load_gen(number).map(Some),
            None => Ok(None),
        }
    }
}
