//! # Connection Configuration
//!
//! Provides a fluent API for describing which side of the protocol a
//! connection plays and how it allocates ids.

use crate::bridge::BothPolicy;

/// Which end of the protocol a connection speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Sends requests and receives events. Allocates ids from 2 upwards.
    Client,
    /// Receives requests and sends events. Allocates ids from `0xff000000`.
    Server,
}

impl Side {
    /// First id this side allocates for objects it creates.
    pub fn first_local_id(self) -> u32 {
        match self {
            Side::Client => CLIENT_ID_START,
            Side::Server => SERVER_ID_START,
        }
    }

    /// Last id this side may allocate.
    pub fn last_local_id(self) -> u32 {
        match self {
            Side::Client => SERVER_ID_START - 1,
            Side::Server => u32::MAX,
        }
    }

    /// Whether `id` falls inside this side's allocation range.
    pub fn owns(self, id: u32) -> bool {
        id >= self.first_local_id() && id <= self.last_local_id()
    }
}

pub const CLIENT_ID_START: u32 = 2;
pub const SERVER_ID_START: u32 = 0xff00_0000;

/// Policy for reusing ids after deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Ids are never reused within a connection.
    #[default]
    Monotonic,
    /// Ids are reused once the peer has acknowledged their deletion.
    Recycle,
}

pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

#[derive(Clone, Debug)]
pub struct Config {
    pub side: Side,
    pub id_policy: IdPolicy,
    /// Upper bound on a single frame, header included. Capped at `u16::MAX`.
    pub max_frame_size: usize,
    /// How bridged requests reach both sinks.
    pub both_policy: BothPolicy,
}

impl Config {
    pub fn client() -> Self {
        ConfigBuilder::new(Side::Client).build()
    }

    pub fn server() -> Self {
        ConfigBuilder::new(Side::Server).build()
    }

    pub fn builder(side: Side) -> ConfigBuilder {
        ConfigBuilder::new(side)
    }
}

/// Fluent builder for `Config`.
pub struct ConfigBuilder {
    side: Side,
    id_policy: IdPolicy,
    max_frame_size: usize,
    both_policy: BothPolicy,
}

impl ConfigBuilder {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            id_policy: IdPolicy::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            both_policy: BothPolicy::default(),
        }
    }

    pub fn id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn both_policy(mut self, policy: BothPolicy) -> Self {
        self.both_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        Config {
            side: self.side,
            id_policy: self.id_policy,
            max_frame_size: self.max_frame_size.clamp(wirepack::HEADER_SIZE, u16::MAX as usize),
            both_policy: self.both_policy,
        }
    }
}
