//! Registration tokens.

/// Associates readiness events with a registration.
///
/// `Token` is an opaque identifier handed out by [`Selector::register`] and
/// carried back in every [`Event`] a provider reports. Tokens are unique among
/// the live registrations of one selector; a token is recycled only after its
/// registration has been purged.
///
/// # Examples
///
/// ```
/// use muxio::Token;
///
/// let token = Token(3);
/// assert_eq!(token.0, 3);
/// ```
///
/// [`Selector::register`]: struct.Selector.html#method.register
/// [`Event`]: struct.Event.html
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

#[test]
fn test_token_roundtrip() {
    let token = Token::from(7);
    assert_eq!(usize::from(token), 7);
}
