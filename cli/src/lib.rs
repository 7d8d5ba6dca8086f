//! skiff CLI - pull an image and run a command inside it.

pub mod commands;
