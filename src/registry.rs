//! Method registry consulted by the dispatch engine.
//!
//! Methods are registered once at start-up through [`RegistryBuilder`];
//! the resulting [`MethodRegistry`] is immutable and shared between
//! connections.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::rpc::{Arg, Rpc};

/// Command handler invoked with the request's [`Rpc`] interface.
pub type Handler = Arc<dyn Fn(&mut dyn Rpc) + Send + Sync>;

/// A registered method.
#[derive(Clone)]
pub struct MethodEntry {
    name: String,
    doc: Vec<String>,
    handler: Handler,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

impl MethodEntry {
    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Documentation lines.
    #[must_use]
    pub fn doc(&self) -> &[String] { &self.doc }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &Handler { &self.handler }
}

/// Error returned when a method name is registered twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("method {0} already registered")]
pub struct DuplicateMethod(pub String);

/// Builder collecting methods before they are frozen into a registry.
///
/// # Examples
///
/// ```
/// use binrpc::{registry::RegistryBuilder, rpc::Arg};
///
/// let registry = RegistryBuilder::new()
///     .register("demo.hello", &["Say hello."], |rpc| {
///         let _ = rpc.add(&[Arg::from("hello")]);
///     })
///     .expect("unique name")
///     .build();
/// assert!(registry.lookup("demo.hello").is_some());
/// assert!(registry.lookup("demo").is_none());
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    methods: BTreeMap<String, MethodEntry>,
}

impl RegistryBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Builder pre-populated with `system.listMethods`, `system.methodHelp`
    /// and `core.echo`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        // both introspection handlers are replaced in `build`
        builder.insert(
            LIST_METHODS,
            &["Lists all RPC methods supported by the server."],
            Arc::new(|rpc: &mut dyn Rpc| list_methods(rpc, &[])),
        );
        builder.insert(
            METHOD_HELP,
            &["Print the help string for given method."],
            Arc::new(|rpc: &mut dyn Rpc| method_help(rpc, &BTreeMap::new())),
        );
        builder.insert("core.echo", &["Returns back its parameters."], Arc::new(echo));
        builder
    }

    /// Register `handler` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateMethod`] if `name` is taken.
    pub fn register<F>(
        mut self,
        name: &str,
        doc: &[&str],
        handler: F,
    ) -> Result<Self, DuplicateMethod>
    where
        F: Fn(&mut dyn Rpc) + Send + Sync + 'static,
    {
        if self.methods.contains_key(name) {
            return Err(DuplicateMethod(name.to_owned()));
        }
        self.insert(name, doc, Arc::new(handler));
        Ok(self)
    }

    fn insert(&mut self, name: &str, doc: &[&str], handler: Handler) {
        self.methods.insert(
            name.to_owned(),
            MethodEntry {
                name: name.to_owned(),
                doc: doc.iter().map(|line| (*line).to_owned()).collect(),
                handler,
            },
        );
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> MethodRegistry {
        let names: Vec<String> = self.methods.keys().cloned().collect();
        let names = Arc::new(names);
        let mut methods = self.methods;
        if let Some(entry) = methods.get_mut(LIST_METHODS) {
            let names = Arc::clone(&names);
            entry.handler = Arc::new(move |rpc: &mut dyn Rpc| list_methods(rpc, &names));
        }
        if methods.contains_key(METHOD_HELP) {
            let docs: BTreeMap<String, Vec<String>> = methods
                .iter()
                .map(|(name, entry)| (name.clone(), entry.doc.clone()))
                .collect();
            let docs = Arc::new(docs);
            if let Some(entry) = methods.get_mut(METHOD_HELP) {
                entry.handler = Arc::new(move |rpc: &mut dyn Rpc| method_help(rpc, &docs));
            }
        }
        MethodRegistry { methods, names }
    }
}

/// Immutable name to handler table.
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: BTreeMap<String, MethodEntry>,
    names: Arc<Vec<String>>,
}

impl MethodRegistry {
    /// Find the method registered under exactly `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&MethodEntry> { self.methods.get(name) }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> &[String] { &self.names }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize { self.methods.len() }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.methods.is_empty() }
}

const LIST_METHODS: &str = "system.listMethods";
const METHOD_HELP: &str = "system.methodHelp";

fn list_methods(rpc: &mut dyn Rpc, names: &[String]) {
    for name in names {
        if rpc.add(&[Arg::from(name.as_str())]).is_err() {
            return;
        }
    }
}

fn method_help(rpc: &mut dyn Rpc, docs: &BTreeMap<String, Vec<String>>) {
    let scan = rpc.scan("s");
    let Some(name) = scan.str(0) else {
        return;
    };
    let name = String::from_utf8_lossy(name);
    match docs.get(name.as_ref()) {
        Some(lines) if !lines.is_empty() => {
            let _ = rpc.add(&[Arg::from(lines.join("\n").as_str())]);
        }
        Some(_) => rpc.fault(500, format_args!("Method {name} has no documentation")),
        None => rpc.fault(500, format_args!("command {name} not found")),
    }
}

fn echo(rpc: &mut dyn Rpc) {
    loop {
        let scan = rpc.scan("*.s");
        let Some(value) = scan.str(0) else {
            break;
        };
        if rpc.add(&[Arg::from(value)]).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let builder = RegistryBuilder::new()
            .register("a", &[], |_| {})
            .expect("first registration");
        let err = builder.register("a", &[], |_| {}).err();
        assert_eq!(err, Some(DuplicateMethod("a".into())));
    }

    #[test]
    fn builtins_are_listed_in_order() {
        let registry = RegistryBuilder::with_builtins()
            .register("zz.last", &[], |_| {})
            .expect("register")
            .build();
        assert_eq!(
            registry.names(),
            &["core.echo", "system.listMethods", "system.methodHelp", "zz.last"]
        );
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn lookup_is_exact() {
        let registry = RegistryBuilder::with_builtins().build();
        assert!(registry.lookup("core.echo").is_some());
        assert!(registry.lookup("core.ech").is_none());
        assert!(registry.lookup("CORE.ECHO").is_none());
    }
}
