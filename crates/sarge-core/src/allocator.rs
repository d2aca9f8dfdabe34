//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Collision-free instance ID allocation."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! An ID is owned by whoever manages to create its instance folder; losing
//! a race surfaces as `AlreadyExists` and the allocator moves on.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::error::{Result, SargeError};
use crate::layout::{HomeLayout, TOP_LEVEL_DIRS};

pub const ID_LENGTH: usize = 6;
pub const MAX_ATTEMPTS: usize = 10;

/// Host-wide directories share the home with instance folders.
const RESERVED_IDS: &[&str] = TOP_LEVEL_DIRS;

/// Random alphanumeric string of `len` characters.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Whether `candidate` could have been produced by the allocator.
pub fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == ID_LENGTH
        && candidate.chars().all(|c| c.is_ascii_alphanumeric())
        && !RESERVED_IDS.contains(&candidate)
}

fn try_claim(candidate: &Path) -> Result<bool> {
    match fs::create_dir(candidate) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!(candidate = %candidate.display(), "name already taken");
            Ok(false)
        }
        Err(err) => Err(SargeError::io(candidate, err)),
    }
}

/// Create a fresh directory under `parent`, named by `next`.
///
/// Retries on `AlreadyExists` up to `max_attempts` times; any other I/O error
/// aborts immediately.
pub fn claim_unique_dir(
    parent: &Path,
    max_attempts: usize,
    mut next: impl FnMut() -> String,
) -> Result<(String, PathBuf)> {
    for _ in 0..max_attempts {
        let name = next();
        let candidate = parent.join(&name);
        if try_claim(&candidate)? {
            return Ok((name, candidate));
        }
    }
    Err(SargeError::AllocationExhausted {
        attempts: max_attempts,
    })
}

type Generator = Box<dyn FnMut() -> String + Send>;

/// Allocates instance IDs by claiming `<home>/<id>`.
pub struct IdAllocator {
    generator: Generator,
    max_attempts: usize,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::with_generator(|| random_token(ID_LENGTH))
    }

    /// Use a custom candidate source; tests feed scripted collisions here.
    pub fn with_generator(generator: impl FnMut() -> String + Send + 'static) -> Self {
        Self {
            generator: Box::new(generator),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn allocate(&mut self, layout: &HomeLayout) -> Result<String> {
        for _ in 0..self.max_attempts {
            let candidate = (self.generator)();
            if !is_valid_id(&candidate) {
                debug!(candidate = %candidate, "rejected malformed id candidate");
                continue;
            }
            let folder = layout.home().join(&candidate);
            if try_claim(&folder)? {
                debug!(instance = %candidate, folder = %folder.display(), "instance id claimed");
                return Ok(candidate);
            }
        }
        Err(SargeError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
