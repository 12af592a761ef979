//! Readiness operation sets and events.

use std::{fmt, ops};

use crate::token::Token;

/// A set of I/O operation kinds.
///
/// `Ops` describes which operations an endpoint is interesting for, or ready
/// to perform. A registration carries two such sets: the *interest set*
/// (operations the owner wants reported) and the *ready set* (operations last
/// observed ready by a selection cycle).
///
/// `Ops` values can be combined together using the various bitwise operators.
///
/// # Examples
///
/// ```
/// use muxio::Ops;
///
/// let ops = Ops::readable() | Ops::writable();
///
/// assert!(ops.is_readable());
/// assert!(ops.is_writable());
/// assert!(!ops.is_acceptable());
/// ```
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash)]
pub struct Ops(usize);

const READABLE: usize = 0b0001;
const WRITABLE: usize = 0b0010;
const ACCEPTABLE: usize = 0b0100;
const CONNECTABLE: usize = 0b1000;

impl Ops {
    /// Returns the empty `Ops` set.
    ///
    /// A registration whose interest set is empty is skipped entirely by
    /// selection cycles.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxio::Ops;
    ///
    /// let ops = Ops::empty();
    ///
    /// assert!(ops.is_empty());
    /// assert!(!ops.is_readable());
    /// ```
    #[inline]
    pub fn empty() -> Ops {
        Ops(0)
    }

    /// Returns an `Ops` representing read readiness.
    #[inline]
    pub fn readable() -> Ops {
        Ops(READABLE)
    }

    /// Returns an `Ops` representing write readiness.
    #[inline]
    pub fn writable() -> Ops {
        Ops(WRITABLE)
    }

    /// Returns an `Ops` representing readiness to accept a connection.
    #[inline]
    pub fn acceptable() -> Ops {
        Ops(ACCEPTABLE)
    }

    /// Returns an `Ops` representing readiness to finish a connect.
    #[inline]
    pub fn connectable() -> Ops {
        Ops(CONNECTABLE)
    }

    /// Returns an `Ops` representing readiness for every operation kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxio::Ops;
    ///
    /// let ops = Ops::all();
    ///
    /// assert!(ops.is_readable());
    /// assert!(ops.is_writable());
    /// assert!(ops.is_acceptable());
    /// assert!(ops.is_connectable());
    /// ```
    #[inline]
    pub fn all() -> Ops {
        Ops(READABLE | WRITABLE | ACCEPTABLE | CONNECTABLE)
    }

    /// Returns true if `Ops` is the empty set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the value includes read readiness.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Ops::readable())
    }

    /// Returns true if the value includes write readiness.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Ops::writable())
    }

    /// Returns true if the value includes accept readiness.
    #[inline]
    pub fn is_acceptable(&self) -> bool {
        self.contains(Ops::acceptable())
    }

    /// Returns true if the value includes connect readiness.
    #[inline]
    pub fn is_connectable(&self) -> bool {
        self.contains(Ops::connectable())
    }

    /// Adds all operations represented by `other` into `self`.
    ///
    /// This is equivalent to `*self = *self | other`.
    #[inline]
    pub fn insert(&mut self, other: Ops) {
        self.0 |= other.0;
    }

    /// Removes all operations represented by `other` from `self`.
    ///
    /// This is equivalent to `*self = *self & !other`.
    #[inline]
    pub fn remove(&mut self, other: Ops) {
        self.0 &= !other.0;
    }

    /// Returns true if `self` is a superset of `other`.
    ///
    /// `other` may represent more than one operation, in which case the
    /// function only returns true if `self` contains all of the operations
    /// specified in `other`.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxio::Ops;
    ///
    /// let ops = Ops::readable() | Ops::writable();
    ///
    /// assert!(ops.contains(Ops::readable()));
    /// assert!(!Ops::readable().contains(ops));
    /// assert!(ops.contains(ops));
    /// ```
    #[inline]
    pub fn contains(&self, other: Ops) -> bool {
        (*self & other) == other
    }

    /// Create an `Ops` instance using the given `usize` representation.
    ///
    /// The `usize` representation must have been obtained from a call to
    /// `Ops::as_usize` and must be treated as opaque. This function is mainly
    /// provided to allow loading an operation set from an `AtomicUsize`.
    #[inline]
    pub fn from_usize(val: usize) -> Ops {
        Ops(val)
    }

    /// Returns a `usize` representation of the `Ops` value.
    ///
    /// The representation is opaque; it is mainly provided to allow storing
    /// an operation set in an `AtomicUsize`.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl ops::BitOr for Ops {
    type Output = Ops;

    #[inline]
    fn bitor(self, other: Ops) -> Ops {
        Ops(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ops {
    #[inline]
    fn bitor_assign(&mut self, other: Ops) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ops {
    type Output = Ops;

    #[inline]
    fn bitand(self, other: Ops) -> Ops {
        Ops(self.0 & other.0)
    }
}

impl ops::BitAndAssign for Ops {
    #[inline]
    fn bitand_assign(&mut self, other: Ops) {
        self.0 &= other.0;
    }
}

impl ops::BitXor for Ops {
    type Output = Ops;

    #[inline]
    fn bitxor(self, other: Ops) -> Ops {
        Ops(self.0 ^ other.0)
    }
}

impl ops::Sub for Ops {
    type Output = Ops;

    #[inline]
    fn sub(self, other: Ops) -> Ops {
        Ops(self.0 & !other.0)
    }
}

impl ops::SubAssign for Ops {
    #[inline]
    fn sub_assign(&mut self, other: Ops) {
        self.0 &= !other.0;
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ops::readable(), "Readable"),
            (Ops::writable(), "Writable"),
            (Ops::acceptable(), "Acceptable"),
            (Ops::connectable(), "Connectable"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        if !one {
            fmt.write_str("(empty)")?;
        }

        Ok(())
    }
}

/// A readiness event reported by a [`Poller`].
///
/// `Event` pairs an operation set with the [`Token`] of the registration it
/// belongs to. A selection cycle folds the reported operations into the
/// registration's ready set.
///
/// # Examples
///
/// ```
/// use muxio::{Event, Ops, Token};
///
/// let event = Event::new(Ops::readable() | Ops::writable(), Token(0));
///
/// assert_eq!(event.readiness(), Ops::readable() | Ops::writable());
/// assert_eq!(event.token(), Token(0));
/// ```
///
/// [`Poller`]: poller/trait.Poller.html
/// [`Token`]: struct.Token.html
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Event {
    kind: Ops,
    token: Token,
}

impl Event {
    /// Creates a new `Event` containing `readiness` and `token`.
    pub fn new(readiness: Ops, token: Token) -> Event {
        Event {
            kind: readiness,
            token,
        }
    }

    /// Returns the event's readiness.
    pub fn readiness(&self) -> Ops {
        self.kind
    }

    /// Returns the event's token.
    pub fn token(&self) -> Token {
        self.token
    }
}

#[test]
fn test_debug_ops() {
    assert_eq!("(empty)", format!("{:?}", Ops::empty()));
    assert_eq!("Readable", format!("{:?}", Ops::readable()));
    assert_eq!("Writable", format!("{:?}", Ops::writable()));
    assert_eq!(
        "Readable | Connectable",
        format!("{:?}", Ops::readable() | Ops::connectable())
    );
}

#[test]
fn test_ops_set_algebra() {
    let mut ops = Ops::empty();
    ops.insert(Ops::readable());
    ops.insert(Ops::writable());

    assert!(ops.contains(Ops::readable() | Ops::writable()));

    ops.remove(Ops::readable());
    assert!(!ops.is_readable());
    assert!(ops.is_writable());

    assert_eq!(Ops::all() - Ops::writable(), {
        let mut rest = Ops::all();
        rest.remove(Ops::writable());
        rest
    });

    let roundtrip = Ops::from_usize(ops.as_usize());
    assert_eq!(roundtrip, ops);
}
