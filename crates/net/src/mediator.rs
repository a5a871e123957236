use std::sync::{Arc, RwLock, Weak};

use crate::bus::MessageBus;
use crate::error::NetError;
use crate::facade::{SocketClientFacade, SocketServerFacade};
use crate::net::Socket;
use crate::sync::{read, write};

/// Callbacks into the hosting application.
///
/// The networking core asks, never decides: admission policy lives entirely
/// on the other side of this trait.
pub trait EngineProxy: Send + Sync {
    /// Whether a peer may start (server) or answer (client) a handshake right
    /// now.
    fn can_connect_to_challenge(&self) -> bool;

    /// The transport is up. Must not panic.
    fn networking_established(&self);
}

/// Admits every peer and ignores lifecycle notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAdmission;

impl EngineProxy for OpenAdmission {
    fn can_connect_to_challenge(&self) -> bool {
        true
    }

    fn networking_established(&self) {}
}

/// The facade currently bound to a mediator.
#[derive(Clone)]
pub enum SocketFacade {
    Server(Arc<SocketServerFacade>),
    Client(Arc<SocketClientFacade>),
}

impl SocketFacade {
    pub fn socket(&self) -> Option<Arc<dyn Socket>> {
        match self {
            SocketFacade::Server(server) => server.socket(),
            SocketFacade::Client(client) => client.socket(),
        }
    }

    pub fn as_server(&self) -> Option<&Arc<SocketServerFacade>> {
        match self {
            SocketFacade::Server(server) => Some(server),
            SocketFacade::Client(_) => None,
        }
    }

    pub fn as_client(&self) -> Option<&Arc<SocketClientFacade>> {
        match self {
            SocketFacade::Client(client) => Some(client),
            SocketFacade::Server(_) => None,
        }
    }

    pub fn shut_down(&self) {
        match self {
            SocketFacade::Server(server) => server.shut_down(),
            SocketFacade::Client(client) => client.shut_down(),
        }
    }
}

#[derive(Clone)]
enum FacadeRef {
    Server(Weak<SocketServerFacade>),
    Client(Weak<SocketClientFacade>),
}

impl FacadeRef {
    fn points_to<T>(&self, facade: &T) -> bool {
        let target = facade as *const T as *const ();
        match self {
            FacadeRef::Server(weak) => weak.as_ptr() as *const () == target,
            FacadeRef::Client(weak) => weak.as_ptr() as *const () == target,
        }
    }

    fn upgrade(&self) -> Option<SocketFacade> {
        match self {
            FacadeRef::Server(weak) => weak.upgrade().map(SocketFacade::Server),
            FacadeRef::Client(weak) => weak.upgrade().map(SocketFacade::Client),
        }
    }
}

/// Shared context for one session: its message bus, the application's engine
/// proxy, and the socket facade driving it.
///
/// Each part synchronizes itself; the mediator only hands out references.
/// Server and client mediators are independent and can live in the same
/// process.
pub struct NetworkMediator {
    message_bus: Arc<dyn MessageBus>,
    engine_proxy: Arc<dyn EngineProxy>,
    facade: RwLock<Option<FacadeRef>>,
}

impl NetworkMediator {
    pub fn new(message_bus: Arc<dyn MessageBus>, engine_proxy: Arc<dyn EngineProxy>) -> Arc<Self> {
        Arc::new(Self {
            message_bus,
            engine_proxy,
            facade: RwLock::new(None),
        })
    }

    pub fn message_bus(&self) -> &Arc<dyn MessageBus> {
        &self.message_bus
    }

    pub fn engine_proxy(&self) -> &Arc<dyn EngineProxy> {
        &self.engine_proxy
    }

    pub fn socket_facade(&self) -> Option<SocketFacade> {
        read(&self.facade).as_ref().and_then(FacadeRef::upgrade)
    }

    pub(crate) fn bind_server(&self, server: &Arc<SocketServerFacade>) -> Result<(), NetError> {
        self.bind(FacadeRef::Server(Arc::downgrade(server)))
    }

    pub(crate) fn bind_client(&self, client: &Arc<SocketClientFacade>) -> Result<(), NetError> {
        self.bind(FacadeRef::Client(Arc::downgrade(client)))
    }

    fn bind(&self, facade: FacadeRef) -> Result<(), NetError> {
        let mut slot = write(&self.facade);
        if slot.as_ref().and_then(FacadeRef::upgrade).is_some() {
            return Err(NetError::MediatorBound);
        }
        *slot = Some(facade);
        Ok(())
    }

    /// Clears the binding if it still refers to `facade` or to a facade
    /// that no longer exists.
    pub(crate) fn unbind<T>(&self, facade: &T) {
        let mut slot = write(&self.facade);
        let stale = match slot.as_ref() {
            Some(bound) => bound.points_to(facade) || bound.upgrade().is_none(),
            None => false,
        };
        if stale {
            *slot = None;
        }
    }
}
