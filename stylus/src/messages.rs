//! `messages`
//!
//! The JSON messages exchanged over a server's persistent channel, shared
//! between the remote driver and the server itself. Every message is an
//! object with a tag field `c` and, where there is a payload, a `p` field.
//! Plan submission and cancellation travel as plain request bodies instead;
//! their types live here too.

use serde::{Deserialize, Serialize};

use crate::{driver::DeviceInfo, planning::Plan};

/// Messages pushed from the server to its connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "c", content = "p", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Keepalive acknowledgement; carries nothing.
    Pong,
    /// A motion is about to execute.
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Index of the motion within the plan.
        motion_idx: usize,
    },
    /// The in-progress plot was cancelled.
    Cancelled,
    /// The in-progress plot ran to completion.
    Finished,
    /// The identity of the attached device.
    Dev(DeviceInfo),
    /// The pause state changed.
    Pause {
        /// The new pause state.
        paused: bool,
    },
    /// A plan was submitted by some client; pushed so every client can
    /// display it.
    Plan {
        /// The submitted plan.
        plan: Plan,
    },
}

/// Lightweight commands sent from a client over the persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "c", content = "p", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Keepalive probe; the server answers with
    /// [`ServerMessage::Pong`].
    Ping,
    /// Move the pen servo.
    #[serde(rename_all = "camelCase")]
    SetPenHeight {
        /// Target position in raw actuator units.
        height: u32,
        /// Slew rate in actuator units per 24 ms servo update.
        rate: u32,
    },
    /// Return the toolhead to its home position.
    #[serde(rename_all = "camelCase")]
    GoHome {
        /// Height to raise the pen to first, in raw actuator units.
        pen_up_height: Option<u32>,
        /// Rate for the pen raise.
        pen_up_rate: Option<u32>,
    },
    /// Drop the motors' holding torque.
    Limp,
}

/// Body of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Whether the current motion should be physically aborted.
    pub immediate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_messages_match_the_wire_shape() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).expect("should serialize"),
            r#"{"c":"pong"}"#,
            "pong carries no payload"
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::Progress { motion_idx: 3 })
                .expect("should serialize"),
            r#"{"c":"progress","p":{"motionIdx":3}}"#,
            "progress carries the motion index"
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pause { paused: true })
                .expect("should serialize"),
            r#"{"c":"pause","p":{"paused":true}}"#,
            "pause carries the new state"
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::Dev(DeviceInfo {
                path: "/dev/ttyACM0".to_string()
            }))
            .expect("should serialize"),
            r#"{"c":"dev","p":{"path":"/dev/ttyACM0"}}"#,
            "dev carries the device info"
        );
    }

    #[test]
    fn test_client_messages_match_the_wire_shape() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Ping).expect("should serialize"),
            r#"{"c":"ping"}"#,
            "ping carries no payload"
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::SetPenHeight {
                height: 17750,
                rate: 1000
            })
            .expect("should serialize"),
            r#"{"c":"setPenHeight","p":{"height":17750,"rate":1000}}"#,
            "setPenHeight carries height and rate"
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::Limp).expect("should serialize"),
            r#"{"c":"limp"}"#,
            "limp carries no payload"
        );
    }

    #[test]
    fn test_messages_round_trip() {
        let messages = vec![
            ClientMessage::Ping,
            ClientMessage::SetPenHeight {
                height: 28000,
                rate: 400,
            },
            ClientMessage::GoHome {
                pen_up_height: Some(28000),
                pen_up_rate: Some(1000),
            },
            ClientMessage::Limp,
        ];
        for message in messages {
            let json = serde_json::to_string(&message).expect("should serialize");
            let restored: ClientMessage =
                serde_json::from_str(&json).expect("should deserialize");
            assert_eq!(restored, message, "round trip should preserve {json}");
        }
    }

    #[test]
    fn test_unknown_tags_fail_to_parse() {
        let result = serde_json::from_str::<ServerMessage>(r#"{"c":"mystery"}"#);
        assert!(
            result.is_err(),
            "unknown tags surface as parse errors for the caller to log"
        );
    }
}
