use std::any::type_name;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use gorpc_common::{CodecKind, Result, RpcError};

/// A receiver whose methods can be registered with a [`Server`](crate::Server).
///
/// The receiver lists its methods itself; their typing is erased at
/// registration time into byte-level handlers. Each listed method has the
/// shape `fn(&Self, Args, &mut Reply) -> Result<(), E>` where `Args` decodes
/// from the request body, `Reply` starts from its `Default` value (so
/// container replies begin as empty containers, not nulls) and a returned
/// `E` becomes the call's error text.
pub trait RpcService: Send + Sync + Sized + 'static {
    /// Lists the dispatchable methods of this receiver.
    fn methods(methods: &mut Methods<Self>);
}

/// Registration surface handed to [`RpcService::methods`].
pub struct Methods<R> {
    receiver: Arc<R>,
    table: HashMap<String, Arc<Method>>,
}

impl<R: Send + Sync + 'static> Methods<R> {
    fn new(receiver: R) -> Self {
        Methods {
            receiver: Arc::new(receiver),
            table: HashMap::new(),
        }
    }

    /// Admits one method under `name`.
    ///
    /// A method whose argument or reply type is neither exported (type name
    /// starting upper-case) nor built-in is skipped; registration itself
    /// never fails.
    pub fn add<A, P, E, F>(&mut self, name: &str, f: F)
    where
        A: DeserializeOwned + Send + 'static,
        P: Serialize + Default + Send + 'static,
        E: Display,
        F: Fn(&R, A, &mut P) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        let arg_type = type_name::<A>();
        let reply_type = type_name::<P>();
        if !is_exported_or_builtin(arg_type) || !is_exported_or_builtin(reply_type) {
            debug!(method = name, arg_type, reply_type, "skipping ineligible method");
            return;
        }

        let receiver = Arc::clone(&self.receiver);
        let handler = Box::new(move |kind: CodecKind, payload: &[u8]| -> Result<Vec<u8>> {
            let args: A = kind.decode(payload)?;
            let mut reply = P::default();
            f(&receiver, args, &mut reply).map_err(|e| RpcError::Application(e.to_string()))?;
            kind.encode(&reply)
        });

        self.table.insert(
            name.to_string(),
            Arc::new(Method {
                arg_type,
                reply_type,
                call_count: AtomicU64::new(0),
                handler,
            }),
        );
    }
}

type ErasedHandler = Box<dyn Fn(CodecKind, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// One dispatchable method: the erased handler plus its descriptor.
pub struct Method {
    arg_type: &'static str,
    reply_type: &'static str,
    call_count: AtomicU64,
    handler: ErasedHandler,
}

impl Method {
    /// Decodes the argument payload, runs the method against a fresh reply
    /// and encodes the result. Bumps the call counter on every attempt.
    pub fn invoke(&self, kind: CodecKind, payload: &[u8]) -> Result<Vec<u8>> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        (self.handler)(kind, payload)
    }

    /// How many times this method has been invoked.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }
}

/// A registered service: the receiver's exported name and its method table.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Service {
    /// Builds a service from a receiver.
    ///
    /// The service name is the receiver's bare type name and must start with
    /// an upper-case letter.
    pub fn new<R: RpcService>(receiver: R) -> Result<Service> {
        let name = base_type_name(type_name::<R>());
        if !name.chars().next().is_some_and(char::is_uppercase) {
            return Err(RpcError::InvalidServiceName(name.to_string()));
        }

        let mut methods = Methods::new(receiver);
        R::methods(&mut methods);
        for method in methods.table.keys() {
            debug!("rpc server: register {}.{}", name, method);
        }

        Ok(Service {
            name: name.to_string(),
            methods: methods.table,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// Bare type name: path and generic arguments stripped.
fn base_type_name(full: &str) -> &str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

/// Exported (bare name starts upper-case) or built-in (no module path).
fn is_exported_or_builtin(full: &str) -> bool {
    let name = base_type_name(full);
    name.chars().next().is_some_and(char::is_uppercase) || !full.contains("::")
}
