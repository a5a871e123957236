//! Protocol actions for received messages.
//!
//! Each message kind has exactly one interpreter. Interpreters hold no state
//! of their own: everything they touch is reached through the mediator, and
//! the bus is only mutated through its public operations.

mod challenge;
mod lifecycle;
mod response;

use crate::mediator::NetworkMediator;
use crate::net::{Endpoint, Message};

pub use challenge::interpret_challenge;
pub use lifecycle::{interpret_accepted, interpret_connect_request, interpret_disconnect};
pub use response::interpret_challenge_response;

pub fn interpret(mediator: &NetworkMediator, sender: Endpoint, message: Message) {
    match message {
        Message::ConnectRequest => interpret_connect_request(mediator, sender),
        Message::Challenge(challenge) => interpret_challenge(mediator, sender, &challenge),
        Message::ChallengeResponse(response) => {
            interpret_challenge_response(mediator, sender, &response)
        }
        Message::ConnectionAccepted { session_id } => {
            interpret_accepted(mediator, sender, session_id)
        }
        Message::Heartbeat => log::trace!("Heartbeat from {}", sender),
        Message::Disconnect => interpret_disconnect(mediator, sender),
    }
}
