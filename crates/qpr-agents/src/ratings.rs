// SPDX-License-Identifier: MIT OR Apache-2.0
//! `RatingsAgent`: looks up a static credit/quality rating by symbol. A
//! stand-in for what would be a ratings-provider integration in production
//! (out of scope per §1's "data acquisition is out of scope").

use async_trait::async_trait;
use qpr_capability::Agent;
use qpr_core::{RequestContext, Value};
use qpr_error::{ErrorKind, RuntimeError};

use crate::util::required_str;

const LOOKUP: &str = "ratings.lookup";

/// Five-symbol illustrative ratings table, sorted for readability. A real
/// deployment would replace this with an agent that pulls from a ratings
/// feed; the capability contract (symbol in, rating out) would not change.
const RATINGS_TABLE: &[(&str, &str)] = &[
    ("AAPL", "AA"),
    ("KO", "A+"),
    ("MSFT", "AAA"),
    ("T", "BBB"),
    ("TSLA", "BB+"),
];

/// Looks up a static rating for a security symbol.
pub struct RatingsAgent;

#[async_trait]
impl Agent for RatingsAgent {
    fn name(&self) -> &str {
        "RatingsAgent"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![LOOKUP.to_string()]
    }

    async fn invoke(&self, capability: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
        match capability {
            LOOKUP => {
                let symbol = required_str(args, "symbol")?;
                let rating = RATINGS_TABLE
                    .iter()
                    .find(|(sym, _)| *sym == symbol)
                    .map(|(_, rating)| *rating)
                    .unwrap_or("NR");
                Ok(Value::from(rating))
            }
            other => Err(RuntimeError::new(
                ErrorKind::UnknownCapability,
                format!("RatingsAgent has no method for '{other}'"),
            )),
        }
    }
}
