//! Switch headers to call engine events

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use talktime_core::models::{AnswerEvent, BridgeEvent, CallEvent, HangupEvent, ParkEvent};
use tracing::{debug, warn};

use crate::constants::{DEFAULT_SOURCE_ADDRESS, EPOCH_MILLIS_THRESHOLD, STAMP_FORMAT};
use crate::event::EslEvent;
use crate::events;

const USER_HEADERS: &[&str] = &["variable_user_name", "Caller-ANI"];

const SOURCE_HEADERS: &[&str] = &[
    "variable_sip_received_ip",
    "variable_sip_network_ip",
    "variable_sip_req_host",
];

const CODEC_HEADERS: &[&str] = &["variable_read_codec", "variable_write_codec"];

/// Translate a switch event. `None` for events the engine does not consume
/// and for events missing their identifying headers.
pub fn to_call_event(event: &EslEvent) -> Option<CallEvent> {
    let name = event.event_name()?;

    match name {
        events::CHANNEL_PARK => park(event).map(CallEvent::Park),
        events::CHANNEL_UNPARK => event
            .first_header(&["Unique-ID"])
            .map(|id| CallEvent::Unpark {
                call_id: id.to_string(),
            }),
        events::CHANNEL_BRIDGE => bridge(event).map(CallEvent::Bridge),
        events::CHANNEL_ANSWER => answer(event).map(CallEvent::Answer),
        events::CHANNEL_HANGUP_COMPLETE => hangup(event).map(CallEvent::Hangup),
        other => {
            debug!("Ignoring event {}", other);
            None
        }
    }
}

fn park(event: &EslEvent) -> Option<ParkEvent> {
    let call_id = event.first_header(&["Unique-ID"]);
    let called = event.first_header(&["Caller-Destination-Number"]);
    let username = event.first_header(USER_HEADERS);

    let (Some(call_id), Some(called), Some(username)) = (call_id, called, username) else {
        warn!(
            "Dropping park with missing fields: call={:?} called={:?} user={:?}",
            call_id, called, username
        );
        return None;
    };

    Some(ParkEvent {
        call_id: call_id.to_string(),
        username: username.to_string(),
        called_party: called.to_string(),
        source_address: event
            .first_header(SOURCE_HEADERS)
            .unwrap_or(DEFAULT_SOURCE_ADDRESS)
            .to_string(),
        timestamp: event_time(event, "variable_start_epoch", "variable_start_stamp"),
    })
}

fn bridge(event: &EslEvent) -> Option<BridgeEvent> {
    let b_leg = event.first_header(&["Bridge-B-Unique-ID"]);
    let username = event.first_header(USER_HEADERS);

    let (Some(b_leg), Some(username)) = (b_leg, username) else {
        warn!(
            "Dropping bridge with missing fields: b_leg={:?} user={:?}",
            b_leg, username
        );
        return None;
    };

    Some(BridgeEvent {
        a_leg_id: event
            .first_header(&["Bridge-A-Unique-ID"])
            .map(str::to_string),
        b_leg_id: b_leg.to_string(),
        username: username.to_string(),
    })
}

fn answer(event: &EslEvent) -> Option<AnswerEvent> {
    let Some(call_id) = event.first_header(&["Unique-ID"]) else {
        warn!("Dropping answer without Unique-ID");
        return None;
    };

    Some(AnswerEvent {
        call_id: call_id.to_string(),
        timestamp: event_time(event, "variable_answer_epoch", "variable_answer_stamp"),
    })
}

fn hangup(event: &EslEvent) -> Option<HangupEvent> {
    let Some(call_id) = event.first_header(&["Unique-ID"]) else {
        warn!("Dropping hangup without Unique-ID");
        return None;
    };

    Some(HangupEvent {
        call_id: call_id.to_string(),
        hangup_cause: event.first_header(&["Hangup-Cause"]).map(str::to_string),
        codec: event.first_header(CODEC_HEADERS).map(str::to_string),
        timestamp: event_time(event, "variable_end_epoch", "variable_end_stamp"),
    })
}

/// Event time from an epoch header, else a formatted stamp, else now.
/// The switch reports 0 for epochs it has not reached yet.
pub fn event_time(event: &EslEvent, epoch_header: &str, stamp_header: &str) -> DateTime<Utc> {
    let from_epoch = event
        .first_header(&[epoch_header])
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .and_then(from_epoch);

    let from_stamp = || {
        event
            .first_header(&[stamp_header])
            .and_then(|raw| NaiveDateTime::parse_from_str(raw, STAMP_FORMAT).ok())
            .map(|naive| naive.and_utc())
    };

    from_epoch.or_else(from_stamp).unwrap_or_else(Utc::now)
}

/// Seconds below the threshold, milliseconds above it
pub fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value < EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_opt(value, 0).single()
    } else {
        Utc.timestamp_millis_opt(value).single()
    }
}
