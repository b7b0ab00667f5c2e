//! Opening the process named on the command line.

use std::path::Path;

use anyhow::{Context, Result, bail};
use memsnap_core::{MemoryImage, Process, Transport};
use tracing::debug;

use crate::cli::TargetArgs;

/// The target picked from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'a> {
    Image(&'a Path),
    Pid(u32),
    Name(&'a str),
}

/// Pick one target; `prefer` settles an image given alongside a live process.
pub fn select(target: &TargetArgs, prefer: Transport) -> Result<Selected<'_>> {
    let live = match (target.pid, target.name.as_deref()) {
        (Some(pid), _) => Some(Selected::Pid(pid)),
        (None, Some(name)) => Some(Selected::Name(name)),
        (None, None) => None,
    };
    let selected = match (target.image.as_deref(), live, prefer) {
        (Some(path), None, _) | (Some(path), Some(_), Transport::Image) => Selected::Image(path),
        (None, Some(live), _) | (Some(_), Some(live), Transport::Live) => live,
        (None, None, Transport::Image) => bail!("No target given (use --image)"),
        (None, None, Transport::Live) => bail!("No target given (use --pid or --name)"),
    };
    if target.image.is_some() && (target.pid.is_some() || target.name.is_some()) {
        debug!("Image and live target both given, preferring {}", prefer);
    }
    Ok(selected)
}

pub fn open(target: &TargetArgs, prefer: Transport) -> Result<Box<dyn Process>> {
    match select(target, prefer)? {
        Selected::Image(path) => {
            let image = MemoryImage::load(path)
                .with_context(|| format!("Failed to load memory image {}", path.display()))?;
            Ok(Box::new(image))
        }
        Selected::Pid(pid) => attach(pid),
        Selected::Name(name) => attach(find(name)?),
    }
}

#[cfg(target_os = "linux")]
fn attach(pid: u32) -> Result<Box<dyn Process>> {
    debug!("Attaching to pid {}", pid);
    let process = memsnap_core::process::live::attach(pid)
        .with_context(|| format!("Failed to attach to process {}", pid))?;
    Ok(Box::new(process))
}

#[cfg(target_os = "linux")]
fn find(name: &str) -> Result<u32> {
    match memsnap_core::process::live::find_by_name(name)? {
        Some(pid) => Ok(pid),
        None => bail!("No running process named '{}'", name),
    }
}

#[cfg(not(target_os = "linux"))]
fn attach(_pid: u32) -> Result<Box<dyn Process>> {
    bail!("Live processes are only supported on Linux; use --image")
}

#[cfg(not(target_os = "linux"))]
fn find(_name: &str) -> Result<u32> {
    bail!("Live processes are only supported on Linux; use --image")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::demo_image;

    fn both(image: &str) -> TargetArgs {
        TargetArgs {
            pid: Some(4242),
            name: None,
            image: Some(image.into()),
        }
    }

    #[test]
    fn test_open_saved_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");
        demo_image().save(&path).unwrap();

        let target = TargetArgs {
            image: Some(path),
            ..Default::default()
        };
        let process = open(&target, Transport::Live).unwrap();
        assert_eq!(process.identity().unwrap().to_string(), "d3e01000");
        assert_eq!(process.read_u32(0x10000).unwrap(), 1234);
    }

    #[test]
    fn test_preferred_transport_settles_both_targets() {
        let target = both("world.json");
        assert_eq!(
            select(&target, Transport::Image).unwrap(),
            Selected::Image(Path::new("world.json"))
        );
        assert_eq!(select(&target, Transport::Live).unwrap(), Selected::Pid(4242));
    }

    #[test]
    fn test_single_target_ignores_preference() {
        let target = TargetArgs {
            name: Some("game".into()),
            ..Default::default()
        };
        assert_eq!(select(&target, Transport::Image).unwrap(), Selected::Name("game"));
    }

    #[test]
    fn test_no_target_names_preferred_flags() {
        let target = TargetArgs::default();
        let err = select(&target, Transport::Live).unwrap_err();
        assert!(err.to_string().contains("--pid"));
        let err = select(&target, Transport::Image).unwrap_err();
        assert!(err.to_string().contains("--image"));
    }

    #[test]
    fn test_configured_transport_opens_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");
        demo_image().save(&path).unwrap();

        let target = both(path.to_str().unwrap());
        let process = open(&target, Transport::Image).unwrap();
        assert_eq!(process.identity().unwrap().to_string(), "d3e01000");
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let target = TargetArgs {
            image: Some("/nonexistent/world.json".into()),
            ..Default::default()
        };
        assert!(open(&target, Transport::Image).is_err());
    }
}
