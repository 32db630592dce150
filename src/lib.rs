//! Customize, mount, explore and burn Raspberry Pi OS disk images.
//!
//! A golden image is customized once (files injected from the host in
//! Phase 0, packages and scripts run inside the image in Phase 1) and then
//! burned to as many devices as needed, each with its own hostname.
//!
//! # Architecture
//!
//! ```text
//! cli ──► options (allow-lists, numerics, mode conflicts)
//!  │
//!  └──► pipeline::run
//!          ├── image::extend_and_resize   (append zeros, grow partition 2)
//!          ├── image::acquire             (loop device + mounts, released on drop)
//!          ├── pipeline::inject           (Phase 0, host side)
//!          ├── pipeline::customize        (Phase 1, inside the container)
//!          ├── pipeline::burn             (block copy + per-device edits)
//!          └── store                      (cparams, marker, boot overlay, history)
//!
//! host::Host ── every external tool (losetup, mount, parted, nspawn, dd)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sdmaker::{host::LinuxHost, options::ModeKind, pipeline, settings::Settings};
//!
//! let settings = Settings::load(None)?;
//! let host = LinuxHost::new(&settings);
//! let mut request = pipeline::RunRequest::new(ModeKind::Mount, "/work/pi.img");
//! request.batch = true;
//! pipeline::run(&host, &settings, &request)?;
//! ```

pub mod cli;
pub mod error;
pub mod host;
pub mod image;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod settings;
pub mod store;

pub use error::{ErrorKind, PipelineError};
pub use pipeline::{run, Outcome, RunRequest};
pub use settings::Settings;
