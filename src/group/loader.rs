//! Loader abstraction: how a group fetches a value it does not hold

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};

/// Source of truth for a group's values
///
/// Invoked at most once per coalesced burst; an error is treated as
/// authoritative and handed to every waiter of that burst. Retrying is the
/// loader's own business.
pub trait Getter: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>>;
}

impl<G: Getter + ?Sized> Getter for std::sync::Arc<G> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>> {
        (**self).get(key)
    }
}

/// Adapts a synchronous closure into a [`Getter`]
///
/// ```
/// use peercache::GetterFn;
///
/// let getter = GetterFn::new(|key: &str| match key {
///     "Tom" => Ok(b"630".to_vec()),
///     _ => Err(anyhow::anyhow!("{} not exist", key)),
/// });
/// # let _ = getter;
/// ```
pub struct GetterFn<F>(F);

impl<F> GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Getter for GetterFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>> {
        Box::pin(future::ready((self.0)(key).map(Bytes::from)))
    }
}

impl<F> std::fmt::Debug for GetterFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GetterFn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_getter_fn() {
        let getter = GetterFn::new(|key: &str| {
            if key == "Tom" {
                Ok(b"630".to_vec())
            } else {
                Err(anyhow::anyhow!("{} not exist", key))
            }
        });

        assert_eq!(getter.get("Tom").await.unwrap(), Bytes::from_static(b"630"));
        assert_eq!(
            getter.get("Sam").await.unwrap_err().to_string(),
            "Sam not exist"
        );
    }
}
