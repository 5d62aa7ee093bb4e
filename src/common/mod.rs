//! Shared utilities across syntropy modules.

pub mod files;

pub use files::{
    create_dir_mode, mode_of, set_mode, set_mode_best_effort, write_file_mode,
    write_file_mode_best_effort, write_file_with_dirs, write_private_file,
};
