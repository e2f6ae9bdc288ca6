use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Fan-in of several channels into one.
///
/// One forwarder task per present source copies values to the output until
/// that source closes. A closer task holds the last sender and drops it once
/// every forwarder is done, so the output closes only after all sources
/// have. Absent sources contribute nothing. Order is kept per source only.
pub fn merge<T, I>(sources: I) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Option<mpsc::Receiver<T>>>,
{
    let sources: Vec<_> = sources.into_iter().flatten().collect();
    let (tx, out) = mpsc::channel(sources.len().max(1));

    let mut forwarders = JoinSet::new();
    for mut source in sources {
        let tx = tx.clone();
        forwarders.spawn(async move {
            while let Some(value) = source.recv().await {
                if tx.send(value).await.is_err() {
                    // Output dropped; nothing left to deliver to.
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        while forwarders.join_next().await.is_some() {}
        drop(tx);
    });

    out
}
