use std::sync::{Arc, RwLock};

use tracing::trace;

use termlink_frame::{Package, Payload};

type SingleStringHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;
type SingleInt32Handler = Arc<dyn Fn(&str, i32) + Send + Sync>;
type BytesHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
type StringListHandler = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// One optional receive handler per package kind.
///
/// Each handler is invoked with the package name and decoded value, on the
/// connection's receive thread, in wire order. Kinds with no registered
/// handler are discarded silently. Handlers should be set before any send or
/// receive activity begins; re-setting one mid-connection is allowed but
/// races with in-flight dispatch are the caller's to avoid.
#[derive(Default)]
pub struct PackageHandlers {
    single_string: RwLock<Option<SingleStringHandler>>,
    single_int32: RwLock<Option<SingleInt32Handler>>,
    bytes: RwLock<Option<BytesHandler>>,
    string_list: RwLock<Option<StringListHandler>>,
}

impl PackageHandlers {
    /// Register the handler for incoming single-string packages.
    pub fn set_single_string(&self, handler: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.single_string.write().expect("handler lock") = Some(Arc::new(handler));
    }

    /// Register the handler for incoming single-int32 packages.
    pub fn set_single_int32(&self, handler: impl Fn(&str, i32) + Send + Sync + 'static) {
        *self.single_int32.write().expect("handler lock") = Some(Arc::new(handler));
    }

    /// Register the handler for incoming bytes packages.
    pub fn set_bytes(&self, handler: impl Fn(&str, &[u8]) + Send + Sync + 'static) {
        *self.bytes.write().expect("handler lock") = Some(Arc::new(handler));
    }

    /// Register the handler for incoming string-list packages.
    pub fn set_string_list(&self, handler: impl Fn(&str, &[String]) + Send + Sync + 'static) {
        *self.string_list.write().expect("handler lock") = Some(Arc::new(handler));
    }

    /// Dispatch one decoded package to its kind's handler, if registered.
    ///
    /// The handler reference is cloned out before the call so a handler may
    /// re-register handlers without self-deadlocking.
    pub(crate) fn dispatch(&self, package: &Package) {
        match &package.payload {
            Payload::SingleString(value) => {
                let handler = self.single_string.read().expect("handler lock").clone();
                match handler {
                    Some(handler) => handler(&package.name, value),
                    None => trace!(name = %package.name, "no single-string handler, dropping"),
                }
            }
            Payload::SingleInt32(value) => {
                let handler = self.single_int32.read().expect("handler lock").clone();
                match handler {
                    Some(handler) => handler(&package.name, *value),
                    None => trace!(name = %package.name, "no single-int32 handler, dropping"),
                }
            }
            Payload::Bytes(data) => {
                let handler = self.bytes.read().expect("handler lock").clone();
                match handler {
                    Some(handler) => handler(&package.name, data),
                    None => trace!(name = %package.name, "no bytes handler, dropping"),
                }
            }
            Payload::StringList(values) => {
                let handler = self.string_list.read().expect("handler lock").clone();
                match handler {
                    Some(handler) => handler(&package.name, values),
                    None => trace!(name = %package.name, "no string-list handler, dropping"),
                }
            }
        }
    }
}
