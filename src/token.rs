//! Token generation and shape checks.
//!
//! A token is an opaque string naming one entity. Its first character is a sigil telling the
//! entity kind (none for users), followed by [`TOKEN_LEN`] characters drawn from [`ALPHABET`].
//! Whether a well-formed token is actually *registered* is answered by the store, see
//! [`GameStore::classify`](crate::store::GameStore::classify).

use std::fmt;

use rand::Rng;

use crate::error::{StoreError, StoreResult};

/// Length of the random part of every token.
pub const TOKEN_LEN: usize = 8;

/// Characters used for the random part of every token.
pub const ALPHABET: &[u8] = b"0123456789ABCDEF";

const MAX_ATTEMPTS: usize = 10_000;

/// The five kinds of entities addressed by tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A player, owning code versions and games.
    User,
    /// A group of users.
    School,
    /// A group of schools and games.
    Competition,
    /// One recorded simulation.
    Game,
    /// A captured failure report.
    Exception,
}

impl TokenKind {
    /// All kinds, users last since they carry no sigil.
    pub const ALL: [TokenKind; 5] = [
        TokenKind::School,
        TokenKind::Competition,
        TokenKind::Game,
        TokenKind::Exception,
        TokenKind::User,
    ];

    /// Prefix character for this kind, `None` for users.
    pub fn sigil(self) -> Option<char> {
        match self {
            TokenKind::User => None,
            TokenKind::School => Some('S'),
            TokenKind::Competition => Some('P'),
            TokenKind::Game => Some('G'),
            TokenKind::Exception => Some('E'),
        }
    }

    /// Kind implied by the shape of `token`, without checking registration.
    ///
    /// Returns `None` for strings that cannot be a token of any kind.
    pub fn from_shape(token: &str) -> Option<TokenKind> {
        TokenKind::ALL
            .into_iter()
            .find(|kind| kind.is_well_formed(token))
    }

    /// True if `token` has the sigil, length and alphabet of this kind.
    pub fn is_well_formed(self, token: &str) -> bool {
        let suffix = match self.sigil() {
            Some(sigil) => match token.strip_prefix(sigil) {
                Some(rest) => rest,
                None => return false,
            },
            None => token,
        };
        suffix.len() == TOKEN_LEN && suffix.bytes().all(|b| ALPHABET.contains(&b))
    }

    /// Name of the top-level store directory holding this namespace.
    pub(crate) fn dir_name(self) -> &'static str {
        match self {
            TokenKind::User => "data",
            TokenKind::School => "schools",
            TokenKind::Competition => "competitions",
            TokenKind::Game => "games",
            TokenKind::Exception => "exceptions",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::User => "user",
            TokenKind::School => "school",
            TokenKind::Competition => "competition",
            TokenKind::Game => "game",
            TokenKind::Exception => "exception",
        };
        f.write_str(name)
    }
}

/// Draw a fresh token of `kind` for which `is_taken` returns false.
///
/// # Errors
/// [`StoreError::TokenSpaceExhausted`] if no free token was found after a bounded number of draws.
pub fn new_token<R, F>(kind: TokenKind, is_taken: F, rng: &mut R) -> StoreResult<String>
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_ATTEMPTS {
        let token = random_token(kind, rng);
        if !is_taken(&token) {
            return Ok(token);
        }
    }
    Err(StoreError::TokenSpaceExhausted {
        kind,
        attempts: MAX_ATTEMPTS,
    })
}

fn random_token<R: Rng + ?Sized>(kind: TokenKind, rng: &mut R) -> String {
    let mut token = String::with_capacity(TOKEN_LEN + 1);
    if let Some(sigil) = kind.sigil() {
        token.push(sigil);
    }
    for _ in 0..TOKEN_LEN {
        token.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    token
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn generated_tokens_have_kind_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for kind in TokenKind::ALL {
            let token = new_token(kind, |_| false, &mut rng).unwrap();
            assert!(kind.is_well_formed(&token), "{token} is not a {kind}");
            assert_eq!(TokenKind::from_shape(&token), Some(kind));
        }
    }

    #[test]
    fn generation_skips_taken_tokens() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut issued = HashSet::new();
        for _ in 0..500 {
            let token = new_token(TokenKind::Game, |t| issued.contains(t), &mut rng).unwrap();
            assert!(issued.insert(token));
        }
    }

    #[test]
    fn generation_gives_up_on_full_namespace() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = new_token(TokenKind::School, |_| true, &mut rng).unwrap_err();
        assert!(matches!(err, StoreError::TokenSpaceExhausted { .. }));
    }

    #[test]
    fn shape_rejects_path_like_strings() {
        assert_eq!(TokenKind::from_shape("../../etc"), None);
        assert_eq!(TokenKind::from_shape("S0000000"), None);
        assert_eq!(TokenKind::from_shape("s00000000"), None);
        assert_eq!(TokenKind::from_shape(""), None);
    }

    #[test]
    fn user_tokens_may_start_with_hex_sigil_letters() {
        // 'E' is both a hex digit and the exception sigil; length disambiguates.
        assert_eq!(TokenKind::from_shape("E1234567"), Some(TokenKind::User));
        assert_eq!(TokenKind::from_shape("E12345678"), Some(TokenKind::Exception));
    }
}
