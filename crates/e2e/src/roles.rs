//! Role session flows
//!
//! Login and logout are sub-flows built from ordinary locator actions. The
//! controls they touch come from a [`SessionLayout`] so a redesigned UI only
//! needs a new layout, not new scenarios.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::driver::{Driver, Readiness};
use crate::error::{E2eError, E2eResult};
use crate::locator::{Action, Locator};
use crate::oracle::Predicate;
use crate::selector::{LocatorRef, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Restaurant,
    Delivery,
}

impl Role {
    pub fn all() -> [Role; 3] {
        [Role::Customer, Role::Restaurant, Role::Delivery]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Restaurant => "restaurant",
            Role::Delivery => "delivery",
        }
    }

    /// Route prefix of the role's dashboard.
    pub fn dashboard_route(&self) -> &'static str {
        match self {
            Role::Customer => "/customer",
            Role::Restaurant => "/restaurant",
            Role::Delivery => "/delivery",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" | "cliente" => Ok(Role::Customer),
            "restaurant" | "restaurante" => Ok(Role::Restaurant),
            "delivery" | "entregador" => Ok(Role::Delivery),
            other => Err(E2eError::SpecParse(format!("unknown role: {other}"))),
        }
    }
}

/// One value per role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerRole<T> {
    pub customer: T,
    pub restaurant: T,
    pub delivery: T,
}

impl<T> PerRole<T> {
    pub fn get(&self, role: Role) -> &T {
        match role {
            Role::Customer => &self.customer,
            Role::Restaurant => &self.restaurant,
            Role::Delivery => &self.delivery,
        }
    }
}

fn xpath(path: &str) -> LocatorRef {
    LocatorRef::first(Selector::xpath(path))
}

/// Locators of the authentication controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLayout {
    pub sign_in_path: String,
    /// Header control leading to sign-in; only shown without a session
    pub sign_in_entry: LocatorRef,
    pub role_choice: PerRole<LocatorRef>,
    pub email: LocatorRef,
    pub password: LocatorRef,
    pub submit: LocatorRef,
    /// Clicked in order; the first one is the session indicator
    pub logout: PerRole<Vec<LocatorRef>>,
}

impl Default for SessionLayout {
    fn default() -> Self {
        let aside_logout = vec![xpath("html/body/div[2]/div/aside/nav/div[3]/div/button")];
        Self {
            sign_in_path: "/auth/sign-in".to_string(),
            sign_in_entry: xpath("html/body/div[2]/div/header/div/div/div/button"),
            role_choice: PerRole {
                customer: xpath("html/body/div[2]/div/div/div/div/div[2]/div/div/button"),
                restaurant: xpath("html/body/div[2]/div/div/div/div/div[2]/div/div/button[2]"),
                delivery: xpath("html/body/div[2]/div/div/div/div/div[2]/div/div/button[3]"),
            },
            email: xpath("html/body/div[2]/div/div/div/div[2]/div/div[2]/div/div/div/input"),
            password: xpath("html/body/div[2]/div/div/div/div[2]/div/div[2]/div/div[2]/div/input"),
            submit: xpath("html/body/div[2]/div/div/div/div[2]/div/div[2]/div/button"),
            logout: PerRole {
                customer: vec![
                    xpath("html/body/div[2]/div/nav/div/div/div[3]/button"),
                    xpath("html/body/div[2]/div/nav/div/div/div[3]/div/div[2]/button"),
                ],
                restaurant: aside_logout.clone(),
                delivery: aside_logout,
            },
        }
    }
}

impl SessionLayout {
    /// Control whose visibility means a session of `role` is active.
    pub fn logout_control(&self, role: Role) -> Option<&LocatorRef> {
        self.logout.get(role).first()
    }

    /// Holds when the page did not grant access: a redirect to sign-in or
    /// the access-denied notice.
    pub fn access_denied(&self) -> Predicate {
        Predicate::AnyOf(vec![
            Predicate::UrlContains(self.sign_in_path.clone()),
            Predicate::ContentContains("Acesso Negado".to_string()),
        ])
    }
}

/// Runs login and logout against the session the locator is bound to.
pub struct RoleSessionHelper<'a, D: Driver + ?Sized> {
    locator: &'a Locator<'a, D>,
    config: &'a EngineConfig,
}

impl<'a, D: Driver + ?Sized> RoleSessionHelper<'a, D> {
    pub fn new(locator: &'a Locator<'a, D>, config: &'a EngineConfig) -> Self {
        Self { locator, config }
    }

    pub async fn login(&self, role: Role, email: &str, password: &str) -> E2eResult<()> {
        let layout = &self.config.layout;
        let timeouts = self.locator.timeouts();
        info!("login as {role} ({email})");

        if self.locator.probe(&layout.sign_in_entry, timeouts.probe()).await? {
            self.click(&layout.sign_in_entry).await?;
        } else {
            let url = self.config.resolve_url(&layout.sign_in_path);
            debug!("sign-in entry not shown, navigating to {url}");
            let page = self.locator.active_page().await?;
            self.locator
                .driver()
                .goto(&page, &url, Readiness::Commit, timeouts.navigation())
                .await?;
        }

        // The chooser renders after the sign-in route loads; give it the
        // full locate budget rather than the short entry probe.
        let choice = layout.role_choice.get(role);
        if self.locator.probe(choice, timeouts.locate()).await? {
            self.click(choice).await?;
        } else {
            debug!("no role selector shown for {role}");
        }

        self.fill(&layout.email, email).await?;
        self.fill(&layout.password, password).await?;
        self.click(&layout.submit).await
    }

    pub async fn logout(&self, role: Role) -> E2eResult<()> {
        info!("logout ({role})");
        for control in self.config.layout.logout.get(role) {
            self.click(control).await?;
        }
        Ok(())
    }

    async fn click(&self, target: &LocatorRef) -> E2eResult<()> {
        let timeout = self.locator.timeouts().action();
        self.locator.act(target, None, &Action::Click, timeout).await
    }

    async fn fill(&self, target: &LocatorRef, value: &str) -> E2eResult<()> {
        let timeout = self.locator.timeouts().action();
        self.locator
            .act(target, None, &Action::Fill(value.to_string()), timeout)
            .await
    }
}
