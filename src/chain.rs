//! Primary pool, then tunnel pool, then direct dispatch.

use crate::middleware::ProxyRotationMiddleware;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

/// The two proxy stages in front of direct dispatch.
///
/// Outer middlewares (retry, circuit breaking, caching) go on the
/// [`ClientBuilder`] before [`FallbackChain::attach`]; the builder's inner
/// client performs the final direct attempt.
#[derive(Clone)]
pub struct FallbackChain {
    primary: ProxyRotationMiddleware,
    secondary: ProxyRotationMiddleware,
}

impl FallbackChain {
    pub fn new(primary: ProxyRotationMiddleware, secondary: ProxyRotationMiddleware) -> Self {
        Self { primary, secondary }
    }

    /// Append both stages to `builder`.
    pub fn attach(&self, builder: ClientBuilder) -> ClientBuilder {
        builder.with(self.primary.clone()).with(self.secondary.clone())
    }

    /// Build a client whose direct stage is `direct`.
    pub fn client(&self, direct: reqwest::Client) -> ClientWithMiddleware {
        self.attach(ClientBuilder::new(direct)).build()
    }

    pub fn primary(&self) -> &ProxyRotationMiddleware {
        &self.primary
    }

    pub fn secondary(&self) -> &ProxyRotationMiddleware {
        &self.secondary
    }

    /// Shut both stages down.
    pub fn shutdown(&self) {
        self.primary.shutdown();
        self.secondary.shutdown();
    }
}
