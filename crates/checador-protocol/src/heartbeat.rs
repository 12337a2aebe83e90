//! Heart-beat negotiation.
//!
//! Both peers advertise `heart-beat:<cx>,<cy>` in milliseconds: `cx` is the
//! smallest interval at which the sender can emit beats (0 = never), `cy` is
//! the interval it would like to receive them at (0 = not wanted). The
//! effective interval in each direction is the larger of the two relevant
//! values, or disabled if either side is 0.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// One side's `heart-beat` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Interval at which this side can send.
    pub outgoing: Duration,

    /// Interval at which this side wants to receive.
    pub incoming: Duration,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Heart-beating disabled in both directions.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Effective intervals for the client that advertised `self`, given the
    /// broker's advertisement.
    pub fn negotiate(&self, server: &HeartBeat) -> NegotiatedHeartBeat {
        NegotiatedHeartBeat {
            send_every: effective(self.outgoing, server.incoming),
            expect_every: effective(self.incoming, server.outgoing),
        }
    }
}

fn effective(ours: Duration, theirs: Duration) -> Option<Duration> {
    if ours.is_zero() || theirs.is_zero() {
        None
    } else {
        Some(ours.max(theirs))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }
}

impl FromStr for HeartBeat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidHeartBeat(s.to_string());

        let (cx, cy) = s.trim().split_once(',').ok_or_else(invalid)?;
        let cx: u64 = cx.trim().parse().map_err(|_| invalid())?;
        let cy: u64 = cy.trim().parse().map_err(|_| invalid())?;

        Ok(Self::new(Duration::from_millis(cx), Duration::from_millis(cy)))
    }
}

/// Result of heart-beat negotiation, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedHeartBeat {
    /// How often the client must send something, if at all.
    pub send_every: Option<Duration>,

    /// How often the broker will send something, if at all.
    pub expect_every: Option<Duration>,
}

impl NegotiatedHeartBeat {
    /// Silence after which the connection counts as dead.
    ///
    /// Twice the expected interval, to absorb scheduling and network jitter.
    pub fn read_deadline(&self) -> Option<Duration> {
        self.expect_every.map(|d| d * 2)
    }
}
