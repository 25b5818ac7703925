//! The explicit allow-list of names a locally executed snippet may reach.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Builtin {
    Print,
    Len,
    Type,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Tuple,
    Set,
    Range,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Map,
    Filter,
    Any,
    All,
    Repr,
    Isinstance,
    Exception,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
}

impl Builtin {
    pub const ALL: [Builtin; 33] = [
        Builtin::Print,
        Builtin::Len,
        Builtin::Type,
        Builtin::Str,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::List,
        Builtin::Dict,
        Builtin::Tuple,
        Builtin::Set,
        Builtin::Range,
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Sum,
        Builtin::Round,
        Builtin::Sorted,
        Builtin::Reversed,
        Builtin::Enumerate,
        Builtin::Zip,
        Builtin::Map,
        Builtin::Filter,
        Builtin::Any,
        Builtin::All,
        Builtin::Repr,
        Builtin::Isinstance,
        Builtin::Exception,
        Builtin::ValueError,
        Builtin::TypeError,
        Builtin::KeyError,
        Builtin::IndexError,
        Builtin::ZeroDivisionError,
    ];

    /// Name of the object in Python's `builtins` module.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Type => "type",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Tuple => "tuple",
            Builtin::Set => "set",
            Builtin::Range => "range",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Repr => "repr",
            Builtin::Isinstance => "isinstance",
            Builtin::Exception => "Exception",
            Builtin::ValueError => "ValueError",
            Builtin::TypeError => "TypeError",
            Builtin::KeyError => "KeyError",
            Builtin::IndexError => "IndexError",
            Builtin::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// Explicit set of names a snippet may reach beyond its own variables.
/// Anything absent (including `__import__`) is a `NameError` or `ImportError` at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    builtins: BTreeSet<Builtin>,
    stderr: bool,
}

impl Capabilities {
    /// Every built-in plus the `stderr` stream handle.
    pub fn standard() -> Self {
        Self {
            builtins: Builtin::ALL.into_iter().collect(),
            stderr: true,
        }
    }

    /// Nothing at all; snippets can only compute with literals.
    pub fn none() -> Self {
        Self {
            builtins: BTreeSet::new(),
            stderr: false,
        }
    }

    pub fn with(mut self, builtin: Builtin) -> Self {
        self.builtins.insert(builtin);
        self
    }

    pub fn without(mut self, builtin: Builtin) -> Self {
        self.builtins.remove(&builtin);
        self
    }

    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    pub fn allows(&self, builtin: Builtin) -> bool {
        self.builtins.contains(&builtin)
    }

    pub fn allows_stderr(&self) -> bool {
        self.stderr
    }

    pub fn builtins(&self) -> impl Iterator<Item = Builtin> + '_ {
        self.builtins.iter().copied()
    }

    /// Comma separated names, as handed to the execution harness.
    pub fn allow_list(&self) -> String {
        self.builtins()
            .map(Builtin::name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::standard()
    }
}
