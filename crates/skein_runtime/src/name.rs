use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

/// An identifier appearing in story content: a container name, a
/// variable name, a flow name, or a list origin/item name.
///
/// Wrapping the `String` keeps identifiers distinct from display text
/// in signatures. The runtime keys several maps by `Name` (named
/// children, globals, temporaries, flows, patch entries); `Borrow<str>`
/// is what lets all of them be queried with a plain `&str`, and `Deref`
/// covers the occasional `Option<Name>::as_deref`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_owned())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name(s)
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

// Comparisons against literals, in both the owned and reference forms
// the call sites produce.

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
