//! Sync locations and direction resolution

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::path::{ParsedPath, RemotePath, parse_path};

/// One side of a sync job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    /// Bucket plus a prefix normalized to be empty or end in `/`
    Cloud(RemotePath),
}

impl Location {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Location::Local(path.into())
    }

    pub fn cloud(path: RemotePath) -> Self {
        let key = path.dir_prefix();
        Location::Cloud(RemotePath { key, ..path })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match parse_path(raw)? {
            ParsedPath::Local(path) => Location::local(path),
            ParsedPath::Remote(remote) => Location::cloud(remote),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Location::Local(path) => Some(path),
            Location::Cloud(_) => None,
        }
    }

    pub fn as_cloud(&self) -> Option<&RemotePath> {
        match self {
            Location::Cloud(remote) => Some(remote),
            Location::Local(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Cloud(remote) => write!(f, "{remote}"),
        }
    }
}

/// What the transfer phase does with each ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local to cloud
    Upload,
    /// Cloud to local
    Download,
    /// Cloud to cloud
    Copy,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
            Direction::Copy => write!(f, "copy"),
        }
    }
}

/// A validated source/destination pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    source: Location,
    destination: Location,
}

impl SyncJob {
    /// Classify both command-line paths and build the job
    pub fn resolve(source: &str, destination: &str) -> Result<Self> {
        Self::new(Location::parse(source)?, Location::parse(destination)?)
    }

    /// Local to local is rejected; every other pairing has a direction
    pub fn new(source: Location, destination: Location) -> Result<Self> {
        if source.is_local() && destination.is_local() {
            return Err(Error::InvalidDirection(format!(
                "cannot sync between two local directories ({source} -> {destination})"
            )));
        }
        Ok(Self {
            source,
            destination,
        })
    }

    pub fn source(&self) -> &Location {
        &self.source
    }

    pub fn destination(&self) -> &Location {
        &self.destination
    }

    pub fn direction(&self) -> Direction {
        match (&self.source, &self.destination) {
            (Location::Local(_), _) => Direction::Upload,
            (Location::Cloud(_), Location::Local(_)) => Direction::Download,
            (Location::Cloud(_), Location::Cloud(_)) => Direction::Copy,
        }
    }
}
