//! `url` and `file` stations: a looping media element routed into the graph.

use crate::error::{RadioError, Result};
use crate::graph::{NodeArena, NodeId, NodeSpec, SharedBackend};
use crate::station::{MediaInput, SourceSpec, Station};
use crate::synth::{Lifecycle, SoundSource};

pub struct MediaSource {
    arena: NodeArena,
    output: NodeId,
    state: Lifecycle,
}

impl MediaSource {
    pub fn new(backend: &SharedBackend, input: MediaInput) -> Result<Self> {
        let mut arena = NodeArena::new(backend.clone());
        let element = arena.add(NodeSpec::Media(input), "media")?;
        let output = arena.gain(1.0, "media-out")?;
        arena.connect(element, output)?;
        Ok(Self {
            arena,
            output,
            state: Lifecycle::Idle,
        })
    }

    /// Media for a non-synth station. `url` stations play their own URL;
    /// `file` stations need the bytes handed in by the caller.
    pub fn for_station(
        backend: &SharedBackend,
        station: &Station,
        media: Option<MediaInput>,
    ) -> Result<Self> {
        let input = match (&station.source, media) {
            (SourceSpec::Url { url }, _) => MediaInput::Url(url.clone()),
            (SourceSpec::File, Some(input)) => input,
            (SourceSpec::File, None) => {
                return Err(RadioError::MissingMedia {
                    station: station.id.clone(),
                })
            }
            (SourceSpec::Synth(_), _) => {
                return Err(RadioError::backend("media source", "synth station has no media"))
            }
        };
        Self::new(backend, input)
    }
}

impl SoundSource for MediaSource {
    fn kind(&self) -> &'static str {
        "media"
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Ok(());
        }
        self.arena.start_sources()
    }

    fn stop(&mut self) {
        if self.state.end() {
            self.arena.stop_sources();
        }
    }
}
