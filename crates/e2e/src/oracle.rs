//! End-state assertions
//!
//! Predicates are evaluated once against the current page, with no implicit
//! retry and no frame readiness wait. A predicate that does not hold, an
//! absent element included, is data ([`Evaluation::Violated`]), not an error;
//! only driver failures and unreadable elements propagate.

use std::fmt;

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::driver::Driver;
use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;
use crate::selector::{LocatorRef, Selector};

/// A check on the current page, written in YAML as a single-entry map
/// keyed by the predicate name (`url_contains: /customer`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Visible(LocatorRef),
    NotVisible(LocatorRef),
    TextEquals {
        locator: LocatorRef,
        field: Option<Selector>,
        expected: String,
    },
    UrlContains(String),
    ContentContains(String),
    /// Page title matches a regular expression
    TitleMatches(String),
    CountAtLeast {
        selector: Selector,
        min: usize,
    },
    AnyOf(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Human-readable form used in verdicts.
    pub fn describe(&self) -> String {
        match self {
            Predicate::Visible(loc) => format!("{loc} visible"),
            Predicate::NotVisible(loc) => format!("{loc} not visible"),
            Predicate::TextEquals {
                locator,
                field: Some(field),
                expected,
            } => format!("{locator} {field} == {expected:?}"),
            Predicate::TextEquals {
                locator, expected, ..
            } => format!("{locator} == {expected:?}"),
            Predicate::UrlContains(s) => format!("url contains {s:?}"),
            Predicate::ContentContains(s) => format!("content contains {s:?}"),
            Predicate::TitleMatches(re) => format!("title matches /{re}/"),
            Predicate::CountAtLeast { selector, min } => format!("count({selector}) >= {min}"),
            Predicate::AnyOf(preds) => format!(
                "any of [{}]",
                preds.iter().map(Predicate::describe).collect::<Vec<_>>().join(", ")
            ),
            Predicate::Not(inner) => format!("not ({})", inner.describe()),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextEqualsArgs {
    locator: LocatorRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<Selector>,
    expected: String,
}

#[derive(Serialize)]
struct TextEqualsRef<'a> {
    locator: &'a LocatorRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a Selector>,
    expected: &'a str,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CountArgs {
    selector: Selector,
    min: usize,
}

const PREDICATES: &[&str] = &[
    "visible",
    "not_visible",
    "text_equals",
    "url_contains",
    "content_contains",
    "title_matches",
    "count_at_least",
    "any_of",
    "not",
];

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Predicate::Visible(loc) => map.serialize_entry("visible", loc)?,
            Predicate::NotVisible(loc) => map.serialize_entry("not_visible", loc)?,
            Predicate::TextEquals {
                locator,
                field,
                expected,
            } => map.serialize_entry(
                "text_equals",
                &TextEqualsRef {
                    locator,
                    field: field.as_ref(),
                    expected: expected.as_str(),
                },
            )?,
            Predicate::UrlContains(s) => map.serialize_entry("url_contains", s)?,
            Predicate::ContentContains(s) => map.serialize_entry("content_contains", s)?,
            Predicate::TitleMatches(re) => map.serialize_entry("title_matches", re)?,
            Predicate::CountAtLeast { selector, min } => map.serialize_entry(
                "count_at_least",
                &CountArgs {
                    selector: selector.clone(),
                    min: *min,
                },
            )?,
            Predicate::AnyOf(preds) => map.serialize_entry("any_of", preds)?,
            Predicate::Not(inner) => map.serialize_entry("not", inner)?,
        }
        map.end()
    }
}

struct PredicateVisitor;

impl<'de> Visitor<'de> for PredicateVisitor {
    type Value = Predicate;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a single-entry map such as `url_contains: /customer`")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Predicate, A::Error> {
        let Some(name) = map.next_key::<String>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        let predicate = match name.as_str() {
            "visible" => Predicate::Visible(map.next_value()?),
            "not_visible" => Predicate::NotVisible(map.next_value()?),
            "text_equals" => {
                let args: TextEqualsArgs = map.next_value()?;
                Predicate::TextEquals {
                    locator: args.locator,
                    field: args.field,
                    expected: args.expected,
                }
            }
            "url_contains" => Predicate::UrlContains(map.next_value()?),
            "content_contains" => Predicate::ContentContains(map.next_value()?),
            "title_matches" => Predicate::TitleMatches(map.next_value()?),
            "count_at_least" => {
                let args: CountArgs = map.next_value()?;
                Predicate::CountAtLeast {
                    selector: args.selector,
                    min: args.min,
                }
            }
            "any_of" => Predicate::AnyOf(map.next_value()?),
            "not" => Predicate::Not(map.next_value()?),
            other => return Err(de::Error::unknown_variant(other, PREDICATES)),
        };
        if let Some(extra) = map.next_key::<String>()? {
            map.next_value::<IgnoredAny>()?;
            return Err(de::Error::custom(format!(
                "predicate `{name}` is followed by `{extra}`; write one predicate per entry"
            )));
        }
        Ok(predicate)
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PredicateVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    Holds,
    Violated { expected: String, actual: String },
}

impl Evaluation {
    pub fn holds(&self) -> bool {
        matches!(self, Evaluation::Holds)
    }

    fn check(holds: bool, expected: String, actual: impl Into<String>) -> Self {
        if holds {
            Evaluation::Holds
        } else {
            Evaluation::Violated {
                expected,
                actual: actual.into(),
            }
        }
    }
}

/// Evaluate `predicate` against the locator's active page.
pub fn evaluate<'a, D: Driver + ?Sized>(
    locator: &'a Locator<'a, D>,
    predicate: &'a Predicate,
) -> BoxFuture<'a, E2eResult<Evaluation>> {
    async move {
        let expected = predicate.describe();
        let evaluation = match predicate {
            Predicate::Visible(loc) => {
                let visible = locator.is_visible(loc, None).await?;
                Evaluation::check(visible, expected, "not visible")
            }
            Predicate::NotVisible(loc) => {
                let visible = locator.is_visible(loc, None).await?;
                Evaluation::check(!visible, expected, "visible")
            }
            Predicate::TextEquals {
                locator: loc,
                field,
                expected: want,
            } => {
                match locator.read_now(loc, field.as_ref(), None).await? {
                    Some(text) => Evaluation::check(&text == want, expected, text),
                    None => Evaluation::check(false, expected, format!("no element matches {loc}")),
                }
            }
            Predicate::UrlContains(s) => {
                let page = locator.active_page().await?;
                let url = locator.driver().url(&page).await?;
                Evaluation::check(url.contains(s.as_str()), expected, url)
            }
            Predicate::ContentContains(s) => {
                let page = locator.active_page().await?;
                let content = locator.driver().content(&page).await?;
                let found = content.contains(s.as_str());
                Evaluation::check(found, expected, excerpt(&content))
            }
            Predicate::TitleMatches(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|e| E2eError::SpecParse(format!("bad title pattern: {e}")))?;
                let page = locator.active_page().await?;
                let title = locator.driver().title(&page).await?;
                Evaluation::check(re.is_match(&title), expected, title)
            }
            Predicate::CountAtLeast { selector, min } => {
                let count = locator.count(selector, None).await?;
                Evaluation::check(count >= *min, expected, format!("count = {count}"))
            }
            Predicate::AnyOf(preds) => {
                let mut actual = Vec::with_capacity(preds.len());
                let mut holds = false;
                for pred in preds {
                    match evaluate(locator, pred).await? {
                        Evaluation::Holds => {
                            holds = true;
                            break;
                        }
                        Evaluation::Violated { actual: a, .. } => actual.push(a),
                    }
                }
                Evaluation::check(holds, expected, actual.join("; "))
            }
            Predicate::Not(inner) => {
                let holds = evaluate(locator, inner).await?.holds();
                Evaluation::check(!holds, expected, inner.describe())
            }
        };
        Ok(evaluation)
    }
    .boxed()
}

fn excerpt(content: &str) -> String {
    const LIMIT: usize = 200;
    match content.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &content[..idx]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::config::Timeouts;
    use crate::driver::{LaunchOptions, Readiness};
    use crate::memory::{MemoryDocument, MemoryDriver, MemoryElement, MemoryFrame, MemorySite};

    fn site() -> MemorySite {
        MemorySite::new("http://localhost:3000")
            .title("ZipFood")
            .route(
                "/checkout",
                MemoryDocument::new()
                    .element(MemoryElement::new(Selector::test_id("summary")).text("Resumo do pedido"))
                    .frame(MemoryFrame::named("payment").never_ready()),
            )
            .route(
            "/customer/orders",
            MemoryDocument::new()
                .element(
                    MemoryElement::new(Selector::css(".order_item"))
                        .child(MemoryElement::new(Selector::css(".order_id")).text("#5676"))
                        .child(MemoryElement::new(Selector::css(".order_status")).text("delivered")),
                )
                .element(
                    MemoryElement::new(Selector::css(".order_item"))
                        .child(MemoryElement::new(Selector::css(".order_id")).text("#5677")),
                )
                .element(MemoryElement::new(Selector::text("Histórico")).text("Histórico de pedidos")),
        )
    }

    async fn check_at(path: &str, predicate: Predicate, timeouts: Timeouts) -> E2eResult<Evaluation> {
        let driver = MemoryDriver::new(Arc::new(site()), Arc::default());
        let browser = driver.open(&LaunchOptions::default()).await?;
        let context = driver.new_context(&browser).await?;
        let page = driver.new_page(&context).await?;
        driver
            .goto(&page, path, Readiness::Load, Duration::from_secs(1))
            .await?;
        let locator = Locator::new(&driver, &context, &page, &timeouts);
        evaluate(&locator, &predicate).await
    }

    async fn check(predicate: Predicate) -> E2eResult<Evaluation> {
        check_at("/customer/orders", predicate, Timeouts::fast()).await
    }

    #[tokio::test]
    async fn test_text_equals_reads_field() {
        let eval = check(Predicate::TextEquals {
            locator: Selector::css(".order_item").nth(0),
            field: Some(Selector::css(".order_id")),
            expected: "#5676".to_string(),
        })
        .await
        .unwrap();
        assert!(eval.holds());

        let eval = check(Predicate::TextEquals {
            locator: Selector::css(".order_item").nth(1),
            field: Some(Selector::css(".order_id")),
            expected: "#5676".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            eval,
            Evaluation::Violated {
                expected: "css=.order_item >> nth=1 css=.order_id == \"#5676\"".to_string(),
                actual: "#5677".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_equals_on_absent_element_is_violated_at_once() {
        let start = Instant::now();
        let eval = check_at(
            "/checkout",
            Predicate::TextEquals {
                locator: Selector::css(".order_item").nth(0),
                field: Some(Selector::css(".order_id")),
                expected: "#5676".to_string(),
            },
            Timeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        match eval {
            Evaluation::Violated { actual, .. } => {
                assert_eq!(actual, "no element matches css=.order_item")
            }
            Evaluation::Holds => panic!("absent element cannot hold"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_frame_does_not_delay_checks() {
        let start = Instant::now();
        let eval = check_at(
            "/checkout",
            Predicate::Visible(Selector::test_id("summary").nth(0)),
            Timeouts::default(),
        )
        .await
        .unwrap();
        assert!(eval.holds());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_page_level_predicates() {
        assert!(check(Predicate::UrlContains("/customer".into())).await.unwrap().holds());
        assert!(check(Predicate::ContentContains("Histórico".into())).await.unwrap().holds());
        assert!(check(Predicate::TitleMatches("ZipFood|Zip Food".into()))
            .await
            .unwrap()
            .holds());
        assert!(check(Predicate::CountAtLeast {
            selector: Selector::css(".order_item"),
            min: 2
        })
        .await
        .unwrap()
        .holds());
        assert!(matches!(
            check(Predicate::TitleMatches("(".into())).await,
            Err(E2eError::SpecParse(_))
        ));
    }

    #[tokio::test]
    async fn test_combinators() {
        let denied = Predicate::AnyOf(vec![
            Predicate::UrlContains("/auth/sign-in".into()),
            Predicate::ContentContains("Acesso Negado".into()),
        ]);
        let eval = check(denied.clone()).await.unwrap();
        assert!(!eval.holds());

        let eval = check(Predicate::Not(Box::new(denied))).await.unwrap();
        assert!(eval.holds());

        let eval = check(Predicate::NotVisible(Selector::text("Histórico").nth(0)))
            .await
            .unwrap();
        assert!(!eval.holds());
    }

    #[test]
    fn test_predicate_yaml_shape() {
        let yaml = r#"
any_of:
  - url_contains: /auth/sign-in
  - not_visible:
      xpath: html/body/div[2]/div/aside/nav/div[3]/div/button
"#;
        let pred: Predicate = serde_yaml::from_str(yaml).unwrap();
        match pred {
            Predicate::AnyOf(preds) => assert_eq!(preds.len(), 2),
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_every_predicate_kind_survives_yaml() {
        let order = Selector::css(".order_item").nth(1);
        let all = vec![
            Predicate::Visible(Selector::test_id("summary").nth(0)),
            Predicate::NotVisible(Selector::role("button", Some("Sair")).nth(0)),
            Predicate::TextEquals {
                locator: order.clone(),
                field: Some(Selector::css(".order_id")),
                expected: "#5677".to_string(),
            },
            Predicate::TextEquals {
                locator: order,
                field: None,
                expected: "delivered".to_string(),
            },
            Predicate::UrlContains("/customer/orders".to_string()),
            Predicate::ContentContains("Acesso Negado".to_string()),
            Predicate::TitleMatches("ZipFood|Zip Food".to_string()),
            Predicate::CountAtLeast {
                selector: Selector::css(".order_item"),
                min: 2,
            },
            Predicate::AnyOf(vec![
                Predicate::UrlContains("/auth/sign-in".to_string()),
                Predicate::Not(Box::new(Predicate::Visible(
                    Selector::xpath("html/body/div[2]/div/aside/nav/div[3]/div/button").nth(0),
                ))),
            ]),
        ];

        let yaml = serde_yaml::to_string(&all).unwrap();
        assert!(!yaml.contains('!'), "tagged output:\n{yaml}");
        let back: Vec<Predicate> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, all);
    }

    #[test]
    fn test_predicate_yaml_rejects_malformed_entries() {
        let err = serde_yaml::from_str::<Predicate>("url_contains: /a\ncontent_contains: b\n")
            .unwrap_err();
        assert!(err.to_string().contains("one predicate per entry"), "{err}");

        let err = serde_yaml::from_str::<Predicate>("visible_soon: { css: .a }\n").unwrap_err();
        assert!(err.to_string().contains("visible_soon"), "{err}");

        assert!(serde_yaml::from_str::<Predicate>("count_at_least: { selector: { css: .a } }\n").is_err());
    }
}
