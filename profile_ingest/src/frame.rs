//! Stack frames and the index that resolves frame identifiers to them.
//!
//! Two raw frame schemas are accepted:
//!
//! 1. **Sampled profiles**: every descriptor is self-contained and already
//!    carries its file, line and resource.
//! 2. **JS self-profiling traces** (`Profiler` web API): descriptors refer to
//!    their script through a `resourceId` into the trace's `resources`
//!    table, which has to be resolved while building the index.
//!
//! Both are normalized into [`Frame`]s keyed by their position in the input.
//!
//! # Example
//!
//! ```
//! use profile_ingest::frame::{FrameKey, FrameSource, ResourcePolicy, WebFrame, create_frame_index};
//!
//! let resources = vec!["https://example.com/app.js".to_string()];
//! let frames = vec![WebFrame {
//!     name: "render".to_string(),
//!     resource_id: Some(0),
//!     line: Some(12),
//!     column: Some(4),
//! }];
//!
//! let index = create_frame_index(
//!     FrameSource::Web { frames: &frames, resources: &resources },
//!     ResourcePolicy::Strict,
//! )
//! .unwrap();
//!
//! let frame = index.get(&FrameKey::Index(0)).unwrap();
//! assert_eq!(frame.resource.as_deref(), Some("https://example.com/app.js"));
//! ```

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors that can occur while building or querying a frame index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameIndexError {
    #[error("frame {frame} references resource {resource_id}, but only {len} resources exist")]
    OutOfRangeResource {
        frame: usize,
        resource_id: usize,
        len: usize,
    },

    #[error("stack {stack_id} references non-existent {target}")]
    InvalidStackReference { stack_id: usize, target: String },
}

pub type Result<T> = std::result::Result<T, FrameIndexError>;

/// Identifier of a frame within one [`FrameIndex`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameKey {
    Index(usize),
    Id(String),
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKey::Index(i) => write!(f, "{}", i),
            FrameKey::Id(id) => f.write_str(id),
        }
    }
}

impl From<usize> for FrameKey {
    fn from(index: usize) -> Self {
        FrameKey::Index(index)
    }
}

impl From<&str> for FrameKey {
    fn from(id: &str) -> Self {
        FrameKey::Id(id.to_string())
    }
}

/// Which raw schema a frame was built from.
///
/// The schemas disagree on field semantics (e.g. whether `resource` is inline
/// or indirect), so downstream consumers occasionally need to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    Sampled,
    Web,
}

/// A normalized stack location.
///
/// Identity is the `key`: two frames compare equal iff their keys match.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub key: FrameKey,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_application: Option<bool>,
    pub origin: FrameOrigin,
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

// ============================================================================
// Raw schemas
// ============================================================================

/// A self-contained frame from a sampled profile's shared frame table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampledFrame {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub is_application: Option<bool>,
}

/// A frame from a JS self-profiling trace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebFrame {
    #[serde(default)]
    pub name: String,
    /// Index into [`WebTrace::resources`].
    #[serde(default)]
    pub resource_id: Option<usize>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

/// One entry of the stack table; stacks form a tree through `parent_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebStack {
    pub frame_id: usize,
    #[serde(default)]
    pub parent_id: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSample {
    pub timestamp: f64,
    /// Absent when the sampled thread was idle.
    #[serde(default)]
    pub stack_id: Option<usize>,
}

/// A complete JS self-profiling trace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebTrace {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub frames: Vec<WebFrame>,
    #[serde(default)]
    pub stacks: Vec<WebStack>,
    #[serde(default)]
    pub samples: Vec<WebSample>,
}

impl WebTrace {
    /// Build the frame index for this trace's frame table.
    pub fn frame_index(&self, policy: ResourcePolicy) -> Result<FrameIndex> {
        create_frame_index(
            FrameSource::Web {
                frames: &self.frames,
                resources: &self.resources,
            },
            policy,
        )
    }

    /// Resolve a stack id to the frame keys on that stack, leaf first.
    pub fn resolve_stack(&self, stack_id: usize) -> Result<Vec<FrameKey>> {
        let mut keys = Vec::new();
        let mut current = Some(stack_id);

        while let Some(id) = current {
            // A well-formed stack table is a tree, so a walk longer than the
            // table itself means a cycle.
            if keys.len() > self.stacks.len() {
                return Err(FrameIndexError::InvalidStackReference {
                    stack_id,
                    target: "cyclic parent chain".to_string(),
                });
            }

            let stack = self
                .stacks
                .get(id)
                .ok_or_else(|| FrameIndexError::InvalidStackReference {
                    stack_id,
                    target: format!("stack {}", id),
                })?;

            if stack.frame_id >= self.frames.len() {
                return Err(FrameIndexError::InvalidStackReference {
                    stack_id,
                    target: format!("frame {}", stack.frame_id),
                });
            }

            keys.push(FrameKey::Index(stack.frame_id));
            current = stack.parent_id;
        }

        Ok(keys)
    }
}

// ============================================================================
// Index construction
// ============================================================================

/// Raw frame input, one variant per supported schema.
#[derive(Debug, Clone, Copy)]
pub enum FrameSource<'a> {
    Sampled(&'a [SampledFrame]),
    Web {
        frames: &'a [WebFrame],
        resources: &'a [String],
    },
}

/// What to do with a `resourceId` outside the resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePolicy {
    /// Fail with [`FrameIndexError::OutOfRangeResource`].
    Strict,
    /// Log a warning and give the frame an empty resource string.
    Degrade,
}

impl Default for ResourcePolicy {
    /// `Strict` in debug builds, `Degrade` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ResourcePolicy::Strict
        } else {
            ResourcePolicy::Degrade
        }
    }
}

/// Immutable mapping from [`FrameKey`] to [`Frame`].
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    frames: BTreeMap<FrameKey, Frame>,
}

impl FrameIndex {
    pub fn get(&self, key: &FrameKey) -> Option<&Frame> {
        self.frames.get(key)
    }

    /// Lookup by positional key.
    pub fn get_index(&self, index: usize) -> Option<&Frame> {
        self.frames.get(&FrameKey::Index(index))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }
}

/// Build a [`FrameIndex`] from raw frame descriptors.
///
/// Keys are assigned from each descriptor's position in the input, so the
/// same input always produces the same index.
pub fn create_frame_index(source: FrameSource<'_>, policy: ResourcePolicy) -> Result<FrameIndex> {
    let mut frames = BTreeMap::new();

    match source {
        FrameSource::Sampled(raw) => {
            for (index, frame) in raw.iter().enumerate() {
                frames.insert(FrameKey::Index(index), sampled_frame(index, frame));
            }
        }
        FrameSource::Web {
            frames: raw,
            resources,
        } => {
            for (index, frame) in raw.iter().enumerate() {
                let resource = match frame.resource_id {
                    Some(id) => Some(resolve_resource(index, id, resources, policy)?),
                    None => None,
                };
                frames.insert(FrameKey::Index(index), web_frame(index, frame, resource));
            }
        }
    }

    debug!("Built frame index with {} frames", frames.len());
    Ok(FrameIndex { frames })
}

fn resolve_resource(
    frame: usize,
    resource_id: usize,
    resources: &[String],
    policy: ResourcePolicy,
) -> Result<String> {
    match resources.get(resource_id) {
        Some(resource) => Ok(resource.clone()),
        None => match policy {
            ResourcePolicy::Strict => Err(FrameIndexError::OutOfRangeResource {
                frame,
                resource_id,
                len: resources.len(),
            }),
            ResourcePolicy::Degrade => {
                warn!(
                    "Frame {} references resource {} outside table of {}; using empty resource",
                    frame,
                    resource_id,
                    resources.len()
                );
                Ok(String::new())
            }
        },
    }
}

fn sampled_frame(index: usize, frame: &SampledFrame) -> Frame {
    Frame {
        key: FrameKey::Index(index),
        name: frame.name.clone(),
        file: frame.file.clone(),
        line: frame.line,
        column: frame.column,
        resource: frame.resource.clone(),
        image: frame.image.clone(),
        path: frame.path.clone(),
        is_application: frame.is_application,
        origin: FrameOrigin::Sampled,
    }
}

fn web_frame(index: usize, frame: &WebFrame, resource: Option<String>) -> Frame {
    let name = if frame.name.is_empty() {
        "(anonymous)".to_string()
    } else {
        frame.name.clone()
    };

    Frame {
        key: FrameKey::Index(index),
        name,
        file: None,
        line: frame.line,
        column: frame.column,
        resource,
        image: None,
        path: None,
        is_application: None,
        origin: FrameOrigin::Web,
    }
}
