//! This module resolves methods registered in an in-process method table.
//!
//! It mirrors reflective method lookup in a managed execution environment:
//! methods are registered under a type path and name, optionally
//! disambiguated by parameter types and visibility, and looked up by
//! descriptor. Registration hands over the address of an
//! already-materialized body, so a resolved method is always executable.

use log::debug;

use super::{AddressProvider, FunctionAddress, ResolveError};

/// Visibility recorded for a registered method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Reachable from outside its defining type
    Public,
    /// Internal to its defining type
    Private,
}

/// How multiple matching methods are handled during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Accept the first registered method matching the query.
    ///
    /// This is the lenient default; when overloads exist and the query does
    /// not name parameter types, the winner is simply registration order,
    /// which can be surprising. Use [`MatchPolicy::Exact`] to turn that into
    /// an error instead.
    #[default]
    FirstMatch,
    /// Require the query to match exactly one registered method
    Exact,
}

/// A registered method: reflective identity plus the address of its body
struct MethodEntry {
    /// Fully-qualified path of the type owning the method
    type_path: String,
    /// Method name
    name: String,
    /// Parameter type names, in declaration order
    params: Vec<String>,
    /// Recorded visibility
    visibility: Visibility,
    /// Address of the materialized body
    addr: usize,
}

/// Query describing the method to resolve
#[derive(Debug, Clone, Copy)]
pub struct MethodQuery<'a> {
    /// Fully-qualified path of the type to search
    pub type_path: &'a str,
    /// Method name to match
    pub name: &'a str,
    /// Parameter type names; `None` leaves overloads undisambiguated
    pub params: Option<&'a [&'a str]>,
    /// Required visibility; `None` matches any
    pub visibility: Option<Visibility>,
}

impl MethodQuery<'_> {
    /// Human-readable form used in error messages
    fn describe(&self) -> String {
        format!("{}::{}", self.type_path, self.name)
    }
}

/// Table of registered methods resolvable by [`MethodQuery`].
///
/// Owned by the host application; there is no process-global table.
#[derive(Default)]
pub struct MethodTable {
    /// Registered methods, in registration order
    entries: Vec<MethodEntry>,
}

impl MethodTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method body under its reflective identity.
    ///
    /// `addr` is the address of the compiled body (obtain it by coercing the
    /// function to a function pointer and casting, `f as fn(..) as usize`),
    /// so the executable form exists before any hook is built from it.
    pub fn register(
        &mut self,
        type_path: &str,
        name: &str,
        params: &[&str],
        visibility: Visibility,
        addr: usize,
    ) {
        debug!("registered method {type_path}::{name}");
        self.entries.push(MethodEntry {
            type_path: type_path.to_owned(),
            name: name.to_owned(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            visibility,
            addr,
        });
    }

    /// Resolves `query` under the given match policy.
    ///
    /// Fails with [`ResolveError::MethodNotFound`] when nothing matches, and
    /// with [`ResolveError::Ambiguous`] when more than one method matches
    /// under [`MatchPolicy::Exact`].
    pub fn resolve(
        &self,
        query: MethodQuery<'_>,
        policy: MatchPolicy,
    ) -> Result<FunctionAddress, ResolveError> {
        let mut matches = self.entries.iter().filter(|entry| entry.matches(&query));

        let first = matches.next().ok_or_else(|| ResolveError::MethodNotFound {
            query: query.describe(),
        })?;

        if policy == MatchPolicy::Exact {
            let extra = matches.count();
            if extra > 0 {
                return Err(ResolveError::Ambiguous {
                    query: query.describe(),
                    count: extra + 1,
                });
            }
        }

        FunctionAddress::new(first.addr, format!("{}::{}", first.type_path, first.name))
    }
}

impl MethodEntry {
    /// Whether this entry satisfies every constraint the query names
    fn matches(&self, query: &MethodQuery<'_>) -> bool {
        if self.type_path != query.type_path || self.name != query.name {
            return false;
        }
        if let Some(params) = query.params {
            if self.params.len() != params.len()
                || self.params.iter().zip(params).any(|(have, want)| have != want)
            {
                return false;
            }
        }
        if let Some(visibility) = query.visibility {
            if self.visibility != visibility {
                return false;
            }
        }
        true
    }
}

impl AddressProvider for MethodTable {
    type Descriptor<'a> = MethodQuery<'a>;

    /// Resolves under the default [`MatchPolicy::FirstMatch`] policy
    fn resolve(&mut self, descriptor: MethodQuery<'_>) -> Result<FunctionAddress, ResolveError> {
        MethodTable::resolve(self, descriptor, MatchPolicy::default())
    }
}
