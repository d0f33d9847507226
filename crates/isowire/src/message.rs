//! # Call and result messages
//!
//! The two message kinds that cross a worker channel.
//!
//! ## Invariants
//!
//! - A call id is unique among the calls in flight from one origin.
//! - A result echoes the id, route and function name of its call, never its args
//!   (they may already have been handed over to the callee).
//! - A result carries exactly one outcome; `Ok(Value::Null)` is the void result.

use bytes::Bytes;
use url::Url;
use uuid::Uuid;

use crate::value::Value;

/// Addressing shared by a call and its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub target_module: Url,
    pub target_segregation_id: Option<String>,
    /// Fragment forced onto the imported module URL to bypass the module cache.
    pub cache_buster: Option<String>,
    /// Set when the call was made from inside a worker.
    pub source_module: Option<Url>,
    pub source_segregation_id: Option<String>,
}

impl Route {
    pub fn new(target_module: Url) -> Self {
        Self {
            target_module,
            target_segregation_id: None,
            cache_buster: None,
            source_module: None,
            source_segregation_id: None,
        }
    }

    pub fn target_segregation_id(&self) -> Option<&str> {
        self.target_segregation_id.as_deref()
    }

    pub fn source_segregation_id(&self) -> Option<&str> {
        self.source_segregation_id.as_deref()
    }

    /// True when the call was relayed out of a worker.
    pub fn is_from_worker(&self) -> bool {
        self.source_module.is_some()
    }
}

#[derive(Debug)]
pub struct CallMessage {
    pub id: Uuid,
    pub route: Route,
    /// `None` asks the worker to import the module without calling anything.
    pub function_name: Option<String>,
    pub args: Vec<Value>,
    /// Opaque telemetry propagation context.
    pub context: Option<Value>,
}

impl CallMessage {
    /// A call routed by `route`, with a fresh id.
    pub fn new(route: Route, function_name: Option<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            route,
            function_name,
            args,
            context: None,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    /// The URL the callee imports: the target module with the cache buster as
    /// its fragment.
    pub fn import_url(&self) -> Url {
        let mut url = self.route.target_module.clone();
        url.set_fragment(self.route.cache_buster.as_deref());
        url
    }

    /// Builds the reply to this call.
    pub fn reply(&self, outcome: Result<Value, Value>) -> ResultMessage {
        ResultMessage {
            id: self.id,
            route: self.route.clone(),
            function_name: self.function_name.clone(),
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct ResultMessage {
    pub id: Uuid,
    pub route: Route,
    pub function_name: Option<String>,
    pub outcome: Result<Value, Value>,
}

impl ResultMessage {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

#[derive(Debug)]
pub enum Message {
    Call(CallMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Call(call) => call.id,
            Self::Result(result) => result.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Result(_) => "result",
        }
    }
}

impl From<CallMessage> for Message {
    fn from(call: CallMessage) -> Self {
        Self::Call(call)
    }
}

impl From<ResultMessage> for Message {
    fn from(result: ResultMessage) -> Self {
        Self::Result(result)
    }
}

/// A message together with the buffers handed over alongside it.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    pub transfer: Vec<Bytes>,
}

impl Envelope {
    pub fn new(message: impl Into<Message>, transfer: Vec<Bytes>) -> Self {
        Self {
            message: message.into(),
            transfer,
        }
    }

    /// Total size of the transferred buffers.
    pub fn transfer_len(&self) -> usize {
        self.transfer.iter().map(Bytes::len).sum()
    }
}
