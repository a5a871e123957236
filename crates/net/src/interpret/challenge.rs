use crate::mediator::NetworkMediator;
use crate::net::{Challenge, ChallengeResponse, Endpoint, Message, MessageKind};

/// Runs on the connecting side: answers a server challenge.
///
/// The response goes out reliably with the client's configured TTL, which
/// defaults to zero and therefore to the bus's default lifetime. The server's
/// own challenge TTL is what actually bounds the attempt.
pub fn interpret_challenge(mediator: &NetworkMediator, sender: Endpoint, challenge: &Challenge) {
    if !mediator.engine_proxy().can_connect_to_challenge() {
        log::debug!("Engine refused to answer challenge from {}", sender);
        return;
    }

    let Some(facade) = mediator.socket_facade() else {
        log::debug!("Challenge from {} arrived with no facade bound", sender);
        return;
    };
    let Some(client) = facade.as_client() else {
        log::debug!("Ignoring challenge from {} on a server facade", sender);
        return;
    };
    let Some(socket) = client.socket() else {
        return;
    };

    let bus = mediator.message_bus();
    bus.resolve(sender, MessageKind::ConnectRequest);

    let response = ChallengeResponse::answer(challenge);
    client.challenge_answered();

    if let Err(e) = bus.send_reliable_message(
        Message::ChallengeResponse(response),
        socket,
        sender,
        client.config().response_ttl_ms,
    ) {
        log::warn!("Failed to answer challenge from {}: {}", sender, e);
    }
}
