use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use super::anr::Anr;

/// Aggregate of everything extracted from one log.
///
/// For monkey logs the first ANR found is both "the" ANR and the monkey ANR,
/// so both fields share one allocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bugreport {
    pub anr: Option<Arc<Anr>>,
    pub monkey_anr: Option<Arc<Anr>>,
}

impl Bugreport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_anr(&self) -> bool {
        self.anr.is_some()
    }

    pub(crate) fn set_monkey_anr(&mut self, anr: Anr) {
        let anr = Arc::new(anr);
        self.anr = Some(Arc::clone(&anr));
        self.monkey_anr = Some(anr);
    }
}

impl Display for Bugreport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.anr {
            Some(anr) => write!(f, "{anr}"),
            None => write!(f, "no ANR found"),
        }
    }
}
