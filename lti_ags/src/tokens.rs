use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use reqwest::header::HeaderValue;

use crate::{AccessToken, AccessTokenRef};

/// How long a token is reused before a new one is requested
///
/// This window applies regardless of the `expires_in` reported by the platform.
pub const DEFAULT_VALIDITY_WINDOW: DurationSecs = DurationSecs(60 * 60);

/// Whether something created at `issued` is still within `window` as of `now`
///
/// Times in the future relative to `now` are treated as just created.
#[inline]
pub fn within_validity_window(issued: UnixTime, now: UnixTime, window: DurationSecs) -> bool {
    now.0.saturating_sub(issued.0) < window.0
}

/// An access token as returned by the authority with the time it was obtained
#[derive(Clone, Debug)]
pub struct TokenWithLifetime {
    token_type: String,
    access_token: AccessToken,
    scope: String,
    expires_in: Option<DurationSecs>,
    issued: UnixTime,
    stale: UnixTime,
    authorization: HeaderValue,
}

impl TokenWithLifetime {
    /// Gets the token type, usually `Bearer`
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the scopes granted to the token
    #[inline]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Gets the lifetime advertised by the authority, if any
    ///
    /// This value is informational only; freshness is governed by the validity window.
    #[inline]
    pub fn expires_in(&self) -> Option<DurationSecs> {
        self.expires_in
    }

    /// Gets the time that the token was obtained
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// The `Authorization` header value for this token, `<token_type> <access_token>`
    ///
    /// The value is marked as sensitive.
    #[inline]
    pub fn authorization(&self) -> &HeaderValue {
        &self.authorization
    }

    /// Whether the token may be reused as of the provided time
    #[inline]
    pub fn is_fresh_at(&self, time: UnixTime) -> bool {
        time < self.stale
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        DurationSecs(self.stale.0.saturating_sub(time.0))
    }
}

/// Configuration for determining how long a token should be considered fresh
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    validity_window: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a validity window of one hour and the system clock.
    fn default() -> Self {
        Self {
            validity_window: DEFAULT_VALIDITY_WINDOW,
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration using the system clock
    pub fn new(validity_window: DurationSecs) -> Self {
        Self {
            validity_window,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets the window during which a token is reused
    pub fn with_validity_window(self, validity_window: DurationSecs) -> Self {
        Self {
            validity_window,
            ..self
        }
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            validity_window: self.validity_window,
            clock,
        }
    }

    /// The window during which a token is reused
    pub fn validity_window(&self) -> DurationSecs {
        self.validity_window
    }

    /// The clock used to stamp and evaluate tokens
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// The current time according to the configured clock
    #[inline]
    pub fn now(&self) -> UnixTime {
        self.clock.now()
    }

    /// Constructs a token stamped with the current time
    ///
    /// # Errors
    ///
    /// Returns an error if the token type or access token cannot be carried in an
    /// `Authorization` header.
    pub fn create_token(
        &self,
        token_type: impl Into<String>,
        access_token: AccessToken,
        scope: impl Into<String>,
        expires_in: Option<DurationSecs>,
    ) -> Result<TokenWithLifetime, reqwest::header::InvalidHeaderValue> {
        let token_type = token_type.into();
        let mut authorization = HeaderValue::try_from(format!(
            "{} {}",
            token_type,
            access_token.as_str()
        ))?;
        authorization.set_sensitive(true);

        let issued = self.clock.now();
        Ok(TokenWithLifetime {
            token_type,
            access_token,
            scope: scope.into(),
            expires_in,
            issued,
            stale: UnixTime(issued.0.saturating_add(self.validity_window.0)),
            authorization,
        })
    }
}
