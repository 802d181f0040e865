//! Message codec.
//!
//! Encodes the tape's outstanding columns plus device state into an
//! [`messages::UpMessage`] and decodes [`messages::DoMessage`] acknowledgement
//! bodies into a validated [`Downlink`].
//!
//! Encoding fills the message with whole columns, track by track, until one
//! more column would push the datagram past [`APP_COAP_MAX_MSG_LEN`]. What does
//! not fit stays outstanding on the tape and [`MessageCodec::has_more`] tells
//! the Packer to run again once this message is queued. The tape is only read
//! here; the Packer marks the covered columns and the Mailer releases them
//! after the acknowledgement.

pub mod messages;

use crate::actions::{RequestedAction, MAX_ACTION_PARAMETERS_SIZE};
use crate::config::{LogLevel, MailerWaitMode, Settings, SettingsPatch};
use crate::error::CodecError;
use crate::tape::{TapeMark, TapeStore, MAX_COLUMN_WIDTH, MAX_PERIODS_COUNT};
use crate::transport::RadioQuality;
use bytes::{Bytes, BytesMut};
use messages::{ColumnRecord, Command, DoMessage, RadioParams, TapeRecord, UpMessage, UplinkEventType};
use prost::Message;

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum datagram the transport carries.
pub const APP_COAP_MAX_MSG_LEN: usize = 1280;

/// Bytes reserved for the transport header.
pub const MAX_COAP_MESSAGE_HEAD_SIZE: usize = 30;

/// Largest encoded payload.
pub const MAX_PAYLOAD_LEN: usize = APP_COAP_MAX_MSG_LEN - MAX_COAP_MESSAGE_HEAD_SIZE;

/// Datagram size above which an alternate path should be considered.
pub const COMPRESSION_CHECK_THRESHOLD: usize = APP_COAP_MAX_MSG_LEN * 3 / 4;

/// Wire protocol version in both directions.
pub const PROTOCOL_VERSION: u32 = 1;

const TAPES_TAG: u32 = 4;
const COLUMNS_TAG: u32 = 3;

impl From<RadioQuality> for RadioParams {
    fn from(q: RadioQuality) -> Self {
        RadioParams {
            rsrp: q.rsrp,
            rsrq: q.rsrq,
            snr: q.snr,
        }
    }
}

/// Device state stamped into an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeContext {
    /// Packet sequence counter
    pub packet_counter: u32,
    /// Event tag
    pub event: UplinkEventType,
    /// Radio quality, when due
    pub radio: Option<RadioQuality>,
    /// Terminal command result
    pub command_result: Option<i32>,
}

impl EncodeContext {
    /// Plain data message.
    pub fn data(packet_counter: u32) -> Self {
        Self {
            packet_counter,
            event: UplinkEventType::Data,
            radio: None,
            command_result: None,
        }
    }
}

/// An encoded uplink ready for the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Serialized message
    pub payload: Bytes,
    /// Columns covered by the payload
    pub mark: TapeMark,
    /// Counter stamped into the payload
    pub packet_counter: u32,
    /// Whether radio parameters were included
    pub includes_radio: bool,
}

/// Validated content of a downlink message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Downlink {
    /// Command for the action queue
    pub command: Option<RequestedAction>,
    /// Settings update
    pub settings: Option<SettingsPatch>,
    /// CoAP `key\0value\0` block
    pub coap_keys: Option<Vec<u8>>,
}

/// Stateful encoder/decoder owned by the runtime.
#[derive(Debug)]
pub struct MessageCodec {
    device_sn: String,
    up: UpMessage,
    down: Option<Downlink>,
    encoded: Bytes,
    mark: TapeMark,
    has_more: bool,
    data_changed: bool,
}

impl MessageCodec {
    /// Creates a codec stamping `device_sn` into every uplink.
    pub fn new(device_sn: impl Into<String>) -> Self {
        Self {
            device_sn: device_sn.into(),
            up: UpMessage::default(),
            down: None,
            encoded: Bytes::new(),
            mark: TapeMark::default(),
            has_more: false,
            data_changed: false,
        }
    }

    /// Resets the uplink message to its header-only state.
    pub fn init_up_message(&mut self) {
        self.up = UpMessage {
            device_sn: self.device_sn.clone(),
            protocol_version: PROTOCOL_VERSION,
            ..Default::default()
        };
    }

    /// Forgets the last decoded downlink.
    pub fn init_do_message(&mut self) {
        self.down = None;
    }

    /// Encodes outstanding tape columns and `ctx` into the message buffer.
    ///
    /// On error the previous encoding is kept.
    pub fn encode_message(&mut self, tape: &TapeStore, ctx: &EncodeContext) -> Result<(), CodecError> {
        let mut up = UpMessage {
            device_sn: self.device_sn.clone(),
            packet_counter: ctx.packet_counter,
            event: ctx.event as i32,
            tapes: Vec::new(),
            radio: ctx.radio.map(RadioParams::from),
            command_result: ctx.command_result,
            protocol_version: PROTOCOL_VERSION,
        };

        let header = up.encoded_len();
        if header > MAX_PAYLOAD_LEN {
            return Err(CodecError::MessageTooLarge {
                len: header,
                max: MAX_PAYLOAD_LEN,
            });
        }
        let mut used = header;

        let mut mark = TapeMark::default();
        let mut has_more = false;
        for snapshot in tape.snapshot() {
            let mut record = TapeRecord {
                track: snapshot.track as u32,
                periods: snapshot.periods,
                columns: Vec::with_capacity(snapshot.columns.len()),
            };
            let mut last_seq = None;
            for column in snapshot.columns {
                record.columns.push(ColumnRecord {
                    period_index: column.period_index as u32,
                    values: column.values,
                });
                if used + record_len(&record) > MAX_PAYLOAD_LEN {
                    record.columns.pop();
                    has_more = true;
                    break;
                }
                last_seq = Some(column.seq);
            }

            if let Some(seq) = last_seq {
                let referenced = record
                    .columns
                    .iter()
                    .map(|c| c.period_index as usize + 1)
                    .max()
                    .unwrap_or(0);
                record.periods.truncate(referenced);
                used += record_len(&record);
                mark.cover(snapshot.track, seq);
                up.tapes.push(record);
            }
            if has_more {
                break;
            }
        }
        if has_more && mark.is_empty() {
            return Err(CodecError::NoRoomForColumn {
                header,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(APP_COAP_MAX_MSG_LEN);
        up.encode(&mut buf)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        if buf.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::MessageTooLarge {
                len: buf.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        self.data_changed = up.tapes != self.up.tapes;
        tracing::debug!(
            len = buf.len(),
            tracks = up.tapes.len(),
            has_more,
            changed = self.data_changed,
            "Encoded uplink"
        );
        self.up = up;
        self.encoded = buf.freeze();
        self.mark = mark;
        self.has_more = has_more;
        Ok(())
    }

    /// Decodes and validates a downlink body.
    ///
    /// On error nothing is applied and the previously decoded downlink stays
    /// available through [`MessageCodec::last_downlink`].
    pub fn decode_message(&mut self, bytes: &[u8]) -> Result<Downlink, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        let msg = DoMessage::decode(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if msg.protocol_version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(msg.protocol_version));
        }

        let command = match msg.command {
            None | Some(Command::ReadLogs(false)) => None,
            Some(Command::ReadLogs(true)) => Some(RequestedAction::ReadLogs),
            Some(Command::UpgradeFw(fw)) => {
                check_param_len("path", fw.path.len())?;
                if fw.size == 0 {
                    return Err(CodecError::InvalidField {
                        field: "size",
                        reason: "image size is zero".to_string(),
                    });
                }
                Some(RequestedAction::UpgradeFirmware {
                    path: fw.path,
                    size: fw.size,
                })
            }
            Some(Command::TerminalCmd(cmd)) => {
                check_param_len("terminal_cmd", cmd.len())?;
                Some(RequestedAction::TerminalCommand(cmd))
            }
        };

        let settings = msg.settings.map(settings_patch).transpose()?;
        if let Some(patch) = &settings {
            Settings::default()
                .apply_patch(patch)
                .map_err(|e| CodecError::InvalidField {
                    field: "settings",
                    reason: e.to_string(),
                })?;
        }

        let coap_keys = if msg.coap_keys.is_empty() {
            None
        } else {
            Some(msg.coap_keys)
        };

        let downlink = Downlink {
            command,
            settings: settings.filter(|p| !p.is_empty()),
            coap_keys,
        };
        self.down = Some(downlink.clone());
        Ok(downlink)
    }

    /// Whether the last encode carried different tape data than the one before.
    pub fn is_data_changed(&self) -> bool {
        self.data_changed
    }

    /// Length of the last encoding.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Bytes of the last encoding.
    pub fn encoded_buffer(&self) -> &[u8] {
        &self.encoded
    }

    /// Columns covered by the last encoding.
    pub fn mark(&self) -> TapeMark {
        self.mark
    }

    /// True when outstanding columns did not fit into the last encoding.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Message built by the last encode.
    pub fn up_message(&self) -> &UpMessage {
        &self.up
    }

    /// Last successfully decoded downlink.
    pub fn last_downlink(&self) -> Option<&Downlink> {
        self.down.as_ref()
    }

    /// Hands the last encoding to the outbox.
    pub fn take_encoded(&self) -> EncodedMessage {
        EncodedMessage {
            payload: self.encoded.clone(),
            mark: self.mark,
            packet_counter: self.up.packet_counter,
            includes_radio: self.up.radio.is_some(),
        }
    }

    /// The datagram is past three quarters of the transport MTU.
    pub fn is_compression_check_required(&self) -> bool {
        self.encoded.len() + MAX_COAP_MESSAGE_HEAD_SIZE > COMPRESSION_CHECK_THRESHOLD
    }

    /// Another column could no longer be added.
    pub fn is_udp_packet_full(&self) -> bool {
        self.has_more
            || self.encoded.len() + MAX_COAP_MESSAGE_HEAD_SIZE + worst_case_column_len()
                > APP_COAP_MAX_MSG_LEN
    }
}

fn record_len(record: &TapeRecord) -> usize {
    prost::encoding::message::encoded_len(TAPES_TAG, record)
}

// Largest column plus growth of the enclosing length prefixes.
fn worst_case_column_len() -> usize {
    let column = ColumnRecord {
        period_index: (MAX_PERIODS_COUNT - 1) as u32,
        values: vec![i32::MIN; MAX_COLUMN_WIDTH],
    };
    prost::encoding::message::encoded_len(COLUMNS_TAG, &column) + 2
}

fn check_param_len(field: &'static str, len: usize) -> Result<(), CodecError> {
    if len == 0 || len > MAX_ACTION_PARAMETERS_SIZE {
        return Err(CodecError::InvalidField {
            field,
            reason: format!("length {len} outside 1..={MAX_ACTION_PARAMETERS_SIZE}"),
        });
    }
    Ok(())
}

fn narrow<T: TryFrom<u32>>(field: &'static str, value: Option<u32>) -> Result<Option<T>, CodecError> {
    value
        .map(|v| {
            T::try_from(v).map_err(|_| CodecError::InvalidField {
                field,
                reason: format!("{v} does not fit the setting"),
            })
        })
        .transpose()
}

fn settings_patch(update: messages::SettingsUpdate) -> Result<SettingsPatch, CodecError> {
    let log_level = update
        .log_level
        .map(|v| {
            LogLevel::from_wire(v).ok_or(CodecError::InvalidField {
                field: "log_level",
                reason: format!("unknown level {v}"),
            })
        })
        .transpose()?;
    Ok(SettingsPatch {
        uplink_timeout_min: narrow("uplink_timeout_min", update.uplink_timeout_min)?,
        resend_initial_timeout_min: narrow(
            "resend_initial_timeout_min",
            update.resend_initial_timeout_min,
        )?,
        max_resend_timeout_h: narrow("max_resend_timeout_h", update.max_resend_timeout_h)?,
        max_resend_attempts: narrow("max_resend_attempts", update.max_resend_attempts)?,
        response_wait_timeout_s: narrow("response_wait_timeout_s", update.response_wait_timeout_s)?,
        packet_counter_limit: update.packet_counter_limit,
        log_level,
        mailer_wait_mode: update.mailer_wait_forever.map(|forever| {
            if forever {
                MailerWaitMode::WaitForever
            } else {
                MailerWaitMode::WaitOnTimeout
            }
        }),
    })
}
