use crate::mediator::NetworkMediator;
use crate::net::{Endpoint, MessageKind, SessionId};

pub fn interpret_connect_request(mediator: &NetworkMediator, sender: Endpoint) {
    match mediator.socket_facade() {
        Some(facade) => match facade.as_server() {
            Some(server) => server.begin_challenge(mediator, sender),
            None => log::debug!("Ignoring connect request from {} on a client", sender),
        },
        None => log::debug!("Connect request from {} arrived with no facade bound", sender),
    }
}

/// Runs on the client: the server verified our response.
pub fn interpret_accepted(mediator: &NetworkMediator, sender: Endpoint, session_id: SessionId) {
    let Some(facade) = mediator.socket_facade() else {
        return;
    };
    let Some(client) = facade.as_client() else {
        log::debug!("Ignoring acceptance from {} on a server", sender);
        return;
    };

    let bus = mediator.message_bus();
    bus.resolve(sender, MessageKind::ConnectRequest);
    bus.resolve(sender, MessageKind::ChallengeResponse);

    client.connection_accepted(mediator, session_id);
}

pub fn interpret_disconnect(mediator: &NetworkMediator, sender: Endpoint) {
    let Some(facade) = mediator.socket_facade() else {
        return;
    };

    mediator.message_bus().cancel_endpoint(sender);

    if let Some(server) = facade.as_server() {
        server.remove_player(sender);
    } else if let Some(client) = facade.as_client() {
        client.server_disconnected();
    }
}
