//! # Probe Loading and Attachment
//!
//! Loads the compiled deletion probe from disk and attaches its tracepoint
//! program to the kernel.
//!
//! ## Types
//!
//! - [`AyaProbeLoader`] - `Ebpf::load_file` on the configured object path
//! - [`AyaCollection`] - owns the loaded [`Ebpf`] (programs + maps)
//! - [`TracepointAttachment`] - owned tracepoint link, detached on release
//!
//! ## Attachment Point
//!
//! - **Tracepoint**: `syscalls/sys_enter_unlinkat` by default, see
//!   [`AttachTarget`]

use std::path::{Path, PathBuf};

use aya::programs::links::Link;
use aya::programs::trace_point::TracePointLink;
use aya::programs::TracePoint;
use aya::Ebpf;
use log::{debug, info};

use super::perf_source::PerfEventSource;
use super::{AttachmentHandle, AttachmentManager, ProbeCollection, ProbeLoader};
use crate::config::AttachTarget;
use crate::domain::errors::{caused_by_permission, error_chain};
use crate::domain::SensorError;

/// Loads probe objects with aya.
#[derive(Debug, Default, Clone, Copy)]
pub struct AyaProbeLoader;

impl ProbeLoader for AyaProbeLoader {
    type Collection = AyaCollection;

    fn load(&self, path: &Path) -> Result<AyaCollection, SensorError> {
        let ebpf = Ebpf::load_file(path)
            .map_err(|e| load_failure(path, "loading probe maps", &e))?;

        info!("✓ Loaded probe object: {}", path.display());
        for (name, _) in ebpf.maps() {
            debug!("  map: {name}");
        }
        for (name, _) in ebpf.programs() {
            debug!("  program: {name}");
        }

        Ok(AyaCollection { ebpf, path: path.to_path_buf() })
    }
}

/// A probe object instantiated in the kernel.
pub struct AyaCollection {
    ebpf: Ebpf,
    path: PathBuf,
}

impl AttachmentManager for AyaCollection {
    type Handle = TracepointAttachment;

    fn attach(&mut self, target: &AttachTarget) -> Result<TracepointAttachment, SensorError> {
        let program: &mut TracePoint = self
            .ebpf
            .program_mut(&target.program)
            .ok_or_else(|| SensorError::ProgramNotFound(target.program.clone()))?
            .try_into()
            .map_err(|e| attach_failure(target, &e))?;

        // Verification happens here, so failures are load errors rather than attach errors
        program.load().map_err(|e| load_failure(&self.path, "verifying probe program", &e))?;

        let link_id = program
            .attach(&target.group, &target.event)
            .map_err(|e| attach_failure(target, &e))?;
        let link = program.take_link(link_id).map_err(|e| attach_failure(target, &e))?;

        info!("✓ Attached tracepoint: {}/{}", target.group, target.event);
        Ok(TracepointAttachment { link, label: format!("{}/{}", target.group, target.event) })
    }
}

impl ProbeCollection for AyaCollection {
    type Source = PerfEventSource;

    fn open_source(&mut self, map: &str, page_count: usize) -> Result<PerfEventSource, SensorError> {
        let events = self.ebpf.take_map(map).ok_or_else(|| SensorError::MapNotFound(map.to_string()))?;
        PerfEventSource::open(map, events, page_count)
    }

    fn release(self) -> Result<(), SensorError> {
        // Dropping the Ebpf closes every program and map fd it still owns
        drop(self.ebpf);
        info!("✓ Released probe collection: {}", self.path.display());
        Ok(())
    }
}

/// Owned link between the probe program and its tracepoint.
pub struct TracepointAttachment {
    link: TracePointLink,
    label: String,
}

impl AttachmentHandle for TracepointAttachment {
    fn release(self) -> Result<(), SensorError> {
        self.link.detach().map_err(|e| SensorError::Release {
            resource: "tracepoint link",
            reason: error_chain(&e),
        })?;
        info!("✓ Detached tracepoint: {}", self.label);
        Ok(())
    }
}

fn load_failure(
    path: &Path,
    action: &'static str,
    err: &(dyn std::error::Error + 'static),
) -> SensorError {
    if caused_by_permission(err) {
        SensorError::Permission { action, reason: error_chain(err) }
    } else {
        SensorError::Load { path: path.to_path_buf(), reason: error_chain(err) }
    }
}

fn attach_failure(target: &AttachTarget, err: &(dyn std::error::Error + 'static)) -> SensorError {
    if caused_by_permission(err) {
        return SensorError::Permission { action: "attaching tracepoint", reason: error_chain(err) };
    }
    SensorError::Attach {
        program: target.program.clone(),
        group: target.group.clone(),
        event: target.event.clone(),
        reason: error_chain(err),
    }
}
