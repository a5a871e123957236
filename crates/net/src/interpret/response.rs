use crate::mediator::NetworkMediator;
use crate::net::{ChallengeResponse, Endpoint, MessageKind};

/// Runs on the server: checks a challenge response against the challenge the
/// server issued to that endpoint.
///
/// An invalid response is discarded and the pending challenge keeps retrying
/// until its TTL, so an honest client still gets further chances. A valid
/// response from an endpoint that is already verified only re-confirms the
/// existing session.
pub fn interpret_challenge_response(
    mediator: &NetworkMediator,
    sender: Endpoint,
    response: &ChallengeResponse,
) {
    let Some(facade) = mediator.socket_facade() else {
        return;
    };
    let Some(server) = facade.as_server() else {
        log::debug!("Ignoring challenge response from {} on a client facade", sender);
        return;
    };

    let Some(issued) = server.issued_challenge(sender) else {
        log::debug!("No live challenge for {}; dropping response", sender);
        return;
    };

    if !response.validate_response(&issued) {
        log::debug!("Invalid challenge response from {}", sender);
        return;
    }

    mediator.message_bus().resolve(sender, MessageKind::Challenge);

    match server.create_player(sender) {
        Some(_) => server.challenge_success(mediator, sender),
        None => server.confirm_verified(mediator, sender),
    }
}
