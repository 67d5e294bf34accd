//! Outgoing-message guard: duplicate-output detection with auto-escalation.
//!
//! A handler bug that re-sends the same prompt would otherwise loop forever
//! against a confused customer. Before any bot-authored send the candidate
//! text is compared to the previously delivered body; an exact consecutive
//! repeat aborts the send and escalates to a human instead. Every delivered
//! customer-visible send becomes the new comparison basis, so an interleaved
//! error text breaks the chain and a legitimate re-prompt goes through.

use crate::error::PlatformError;
use crate::i18n::{Lang, t};
use crate::menu::MenuOption;
use crate::platform::Messaging;

/// Label applied when the guard escalates.
pub const HANDOFF_LABEL: &str = "bot:handoff";

/// One outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: String,
    pub options: Vec<MenuOption>,
    /// Internal note, invisible to the customer.
    pub private: bool,
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            options: Vec::new(),
            private: false,
        }
    }

    pub fn menu(body: impl Into<String>, options: Vec<MenuOption>) -> Self {
        Self {
            body: body.into(),
            options,
            private: false,
        }
    }

    /// Internal note for the human team.
    pub fn note(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            options: Vec::new(),
            private: true,
        }
    }
}

/// Guard decision for one candidate send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Send,
    SuppressAndHandoff,
}

/// Pure duplicate check. Bypassed while the conversation is already handed
/// off, and private notes never trip it.
pub fn check(reply: &Reply, last_bot_message: Option<&str>, in_handoff: bool) -> Verdict {
    if in_handoff || reply.private {
        return Verdict::Send;
    }
    match last_bot_message {
        Some(last) if last == reply.body => Verdict::SuppressAndHandoff,
        _ => Verdict::Send,
    }
}

/// Result of delivering one reply through the guard.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The guard escalated instead of sending.
    pub escalated: bool,
    /// New value for `last_bot_message`. `None` for private notes, which are
    /// invisible to the customer and must not mask a repeated prompt.
    pub last_bot_message: Option<String>,
}

/// Guard wrapper around the messaging surface.
pub struct OutgoingGuard {
    handoff_agent_id: Option<i64>,
}

impl OutgoingGuard {
    pub fn new(handoff_agent_id: Option<i64>) -> Self {
        Self { handoff_agent_id }
    }

    /// Deliver `reply`, or escalate on an exact repeat: send the fixed
    /// handoff message, label the thread, and reassign to a human.
    pub async fn deliver(
        &self,
        platform: &dyn Messaging,
        conversation_id: i64,
        reply: &Reply,
        last_bot_message: Option<&str>,
        in_handoff: bool,
        lang: Lang,
    ) -> Result<Delivery, PlatformError> {
        match check(reply, last_bot_message, in_handoff) {
            Verdict::Send => {
                if reply.options.is_empty() {
                    platform
                        .send_text(conversation_id, &reply.body, reply.private)
                        .await?;
                } else {
                    platform
                        .send_menu(conversation_id, &reply.body, &reply.options)
                        .await?;
                }
                Ok(Delivery {
                    escalated: false,
                    last_bot_message: (!reply.private).then(|| reply.body.clone()),
                })
            }
            Verdict::SuppressAndHandoff => {
                tracing::warn!(
                    conversation_id,
                    "duplicate outgoing message suppressed; escalating to human"
                );
                platform
                    .send_text(conversation_id, &t("handoff_message", lang), false)
                    .await?;
                platform.add_labels(conversation_id, &[HANDOFF_LABEL]).await;
                if let Some(agent_id) = self.handoff_agent_id {
                    platform.assign(conversation_id, agent_id).await;
                }
                Ok(Delivery {
                    escalated: true,
                    last_bot_message: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_send_passes() {
        let reply = Reply::text("Kies een optie");
        assert_eq!(check(&reply, None, false), Verdict::Send);
        assert_eq!(check(&reply, Some("iets anders"), false), Verdict::Send);
    }

    #[test]
    fn exact_repeat_escalates() {
        let reply = Reply::text("Kies een optie");
        assert_eq!(
            check(&reply, Some("Kies een optie"), false),
            Verdict::SuppressAndHandoff
        );
    }

    #[test]
    fn handoff_state_bypasses_guard() {
        let reply = Reply::text("Kies een optie");
        assert_eq!(check(&reply, Some("Kies een optie"), true), Verdict::Send);
    }

    #[test]
    fn private_notes_bypass_guard() {
        let note = Reply::note("intern: klant wacht op medewerker");
        assert_eq!(
            check(&note, Some("intern: klant wacht op medewerker"), false),
            Verdict::Send
        );
    }

    #[test]
    fn interleaved_text_breaks_the_duplicate_chain() {
        // error text then the same prompt again: the error became the
        // comparison basis, so the re-prompt is not a consecutive repeat.
        let prompt = Reply::menu("Kies een optie", vec![]);
        assert_eq!(
            check(&prompt, Some("Dat antwoord herken ik niet."), false),
            Verdict::Send
        );
    }
}
