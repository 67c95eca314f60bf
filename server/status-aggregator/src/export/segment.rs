//! Splits an event's message log into timeline segments.

use chrono::{DateTime, Utc};

use crate::entity::{ComponentAffecting, EventEntity, MessageEntity, MessageType};

/// A contiguous, message-bounded span of an event's public timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSegment {
  pub start_time: DateTime<Utc>,
  /// `None` while the segment is still open.
  pub end_time: Option<DateTime<Utc>>,
  pub messages: Vec<MessageEntity>,
}

#[derive(Debug, Default)]
struct Accumulator {
  pending: Vec<MessageEntity>,
  segments: Vec<TimelineSegment>,
}

impl Accumulator {
  fn push(&mut self, message: MessageEntity) {
    self.pending.push(message);
  }

  /// Closes pending messages into a segment. No-op when nothing is pending.
  fn close(&mut self, end_time: Option<DateTime<Utc>>) {
    let Some(first) = self.pending.first() else {
      return;
    };
    let start_time = first.time;
    let mut messages = std::mem::take(&mut self.pending);
    messages.sort_by(|a, b| a.time.cmp(&b.time));
    self.segments.push(TimelineSegment {
      start_time,
      end_time,
      messages,
    });
  }
}

/// Replays `messages` into segments.
///
/// A Start closes whatever came before it (ending at the Start) and opens a
/// new span; an End closes the span it belongs to at its own time; Manual
/// messages join the open span. Whatever is left at the end stays open for
/// an active event and ends at the event's end otherwise. Blank messages
/// are dropped.
pub fn segment_event(event: &EventEntity, messages: Vec<MessageEntity>) -> Vec<TimelineSegment> {
  let mut messages: Vec<_> = messages
    .into_iter()
    .filter(|m| !m.contents.trim().is_empty())
    .collect();
  messages.sort_by(|a, b| a.time.cmp(&b.time));

  let mut acc = Accumulator::default();
  for message in messages {
    match message.message_type {
      MessageType::Start => {
        acc.close(Some(message.time));
        acc.push(message);
      }
      MessageType::End => {
        let end = message.time;
        acc.push(message);
        acc.close(Some(end));
      }
      MessageType::Manual => acc.push(message),
    }
  }

  let tail_end = if event.is_active() { None } else { event.end_time() };
  acc.close(tail_end);
  acc.segments
}
