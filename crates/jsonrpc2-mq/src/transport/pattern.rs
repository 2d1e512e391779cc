use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

/// Messaging pattern of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketPattern {
    /// Strict send/receive alternation, one outstanding request
    Req,
    /// Strict receive/send alternation, replies go to the requester
    Rep,
    /// Asynchronous request side, round-robin to peers
    Dealer,
    /// Asynchronous reply side, every message carries the sender's identity
    Router,
    /// Send only
    Push,
    /// Receive only
    Pull,
    /// Exclusive pair of peers
    Pair,
}

impl SocketPattern {
    pub const ALL: [SocketPattern; 7] = [
        SocketPattern::Req,
        SocketPattern::Rep,
        SocketPattern::Dealer,
        SocketPattern::Router,
        SocketPattern::Push,
        SocketPattern::Pull,
        SocketPattern::Pair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocketPattern::Req => "REQ",
            SocketPattern::Rep => "REP",
            SocketPattern::Dealer => "DEALER",
            SocketPattern::Router => "ROUTER",
            SocketPattern::Push => "PUSH",
            SocketPattern::Pull => "PULL",
            SocketPattern::Pair => "PAIR",
        }
    }

    pub fn can_send(&self) -> bool {
        !matches!(self, SocketPattern::Pull)
    }

    pub fn can_recv(&self) -> bool {
        !matches!(self, SocketPattern::Push)
    }

    /// Whether a socket of this pattern may be connected to one of `other`
    pub fn is_compatible_with(&self, other: SocketPattern) -> bool {
        use SocketPattern::*;
        matches!(
            (self, other),
            (Req, Rep)
                | (Req, Router)
                | (Rep, Req)
                | (Rep, Dealer)
                | (Dealer, Rep)
                | (Dealer, Router)
                | (Dealer, Dealer)
                | (Router, Req)
                | (Router, Dealer)
                | (Router, Router)
                | (Push, Pull)
                | (Pull, Push)
                | (Pair, Pair)
        )
    }

    /// Received messages are prefixed with the sender's identity frame
    pub fn has_routing_envelope(&self) -> bool {
        matches!(self, SocketPattern::Router)
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            SocketPattern::Req => 1,
            SocketPattern::Rep => 2,
            SocketPattern::Dealer => 3,
            SocketPattern::Router => 4,
            SocketPattern::Push => 5,
            SocketPattern::Pull => 6,
            SocketPattern::Pair => 7,
        }
    }

    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.to_wire() == byte)
    }
}

impl fmt::Display for SocketPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketPattern {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TransportError::Protocol(format!("unknown socket pattern '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_is_symmetric() {
        for a in SocketPattern::ALL {
            for b in SocketPattern::ALL {
                assert_eq!(
                    a.is_compatible_with(b),
                    b.is_compatible_with(a),
                    "{a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_direction() {
        assert!(!SocketPattern::Pull.can_send());
        assert!(!SocketPattern::Push.can_recv());
        assert!(SocketPattern::Dealer.can_send() && SocketPattern::Dealer.can_recv());
        assert!(!SocketPattern::Req.is_compatible_with(SocketPattern::Pull));
    }

    #[test]
    fn test_wire_and_text_forms() {
        for pattern in SocketPattern::ALL {
            assert_eq!(SocketPattern::from_wire(pattern.to_wire()), Some(pattern));
            assert_eq!(pattern.as_str().parse::<SocketPattern>().unwrap(), pattern);
        }
        assert_eq!("dealer".parse::<SocketPattern>().unwrap(), SocketPattern::Dealer);
        assert!("XREQ".parse::<SocketPattern>().is_err());
        assert_eq!(
            serde_json::to_string(&SocketPattern::Router).unwrap(),
            "\"router\""
        );
    }
}
