use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::error::Error;
use crate::source::{Listing, Order};
use crate::window::Window;

/// Items of `listing` whose `key` falls inside `window`.
///
/// Each item is tested once and accepted or rejected. Unordered listings
/// are read to the end; newest-first listings stop at the first item older
/// than `window.start`, so later pages are never requested.
pub fn in_window<'a, T, K>(
    listing: Listing<'a, T>,
    window: Window,
    key: K,
) -> BoxStream<'a, Result<T, Error>>
where
    T: Send + 'a,
    K: Fn(&T) -> DateTime<Utc> + Clone + Send + Sync + 'a,
{
    let accept_key = key.clone();
    created_since(listing, window.start, key, move |item| {
        window.contains(accept_key(item))
    })
}

/// Items with `key >= floor` that also satisfy `accept`, with the same
/// early exit as [`in_window`] for newest-first listings.
pub fn created_since<'a, T, K, P>(
    listing: Listing<'a, T>,
    floor: DateTime<Utc>,
    key: K,
    accept: P,
) -> BoxStream<'a, Result<T, Error>>
where
    T: Send + 'a,
    K: Fn(&T) -> DateTime<Utc> + Send + Sync + 'a,
    P: Fn(&T) -> bool + Send + Sync + 'a,
{
    match listing.order {
        Order::NewestFirst => listing
            .items
            .try_take_while(move |item| future::ready(Ok(key(item) >= floor)))
            .try_filter(move |item| future::ready(accept(item)))
            .boxed(),
        Order::Unordered => listing
            .items
            .try_filter(move |item| future::ready(key(item) >= floor && accept(item)))
            .boxed(),
    }
}
