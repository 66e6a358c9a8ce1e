/// The set of wallets the relay is currently watching.
///
/// Insertion order is kept for listing. Owned by the dispatcher, which is the
/// only writer; the subscriber and matcher borrow it.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    wallets: Vec<String>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from seed wallets, dropping duplicates and blanks.
    pub fn with_wallets<I, S>(wallets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for wallet in wallets {
            let wallet = wallet.as_ref().trim();
            if !wallet.is_empty() {
                list.add(wallet);
            }
        }
        list
    }

    /// Append `wallet` unless it is already watched. Returns whether it was added.
    pub fn add(&mut self, wallet: &str) -> bool {
        if self.contains(wallet) {
            return false;
        }
        self.wallets.push(wallet.to_string());
        true
    }

    /// Remove every occurrence of `wallet`. Returns whether anything was removed.
    pub fn remove(&mut self, wallet: &str) -> bool {
        let before = self.wallets.len();
        self.wallets.retain(|w| w != wallet);
        self.wallets.len() != before
    }

    /// Snapshot of the watched wallets in insertion order.
    pub fn list(&self) -> Vec<String> {
        self.wallets.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.wallets.iter().map(String::as_str)
    }

    pub fn contains(&self, wallet: &str) -> bool {
        self.wallets.iter().any(|w| w == wallet)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
