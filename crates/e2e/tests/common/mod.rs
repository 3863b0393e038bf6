//! Shared fixtures: an in-memory model of the ZipFood app laid out like the
//! production markup, and an engine configuration tuned for it.

#![allow(dead_code)]

use std::path::Path;

use zipfood_e2e::memory::{
    ClickEffect, MemoryDocument, MemoryElement, MemoryFactory, MemoryFrame, MemorySite, Shown,
};
use zipfood_e2e::{EngineConfig, Scenario, ScenarioEngine, Selector, Timeouts};

pub const ORIGIN: &str = "http://localhost:3000";
pub const EMAIL: &str = "admin@gmail.com";
pub const PASSWORD: &str = "12341234";

/// Form container shared by the sign-in and sign-up cards.
const FORM: &str = "html/body/div[2]/div/div/div/div[2]/div/div[2]/div/";

fn xpath(path: &str) -> Selector {
    Selector::xpath(path)
}

fn form_sel(field: &str) -> Selector {
    Selector::xpath(format!("{FORM}{field}"))
}

fn form(field: &str) -> MemoryElement {
    MemoryElement::new(form_sel(field))
}

fn header() -> MemoryElement {
    MemoryElement::new(xpath("html/body/div[2]/div/header/div/div/div/button"))
        .text("Entrar")
        .shown(Shown::SignedOut)
        .on_click(ClickEffect::Navigate("/auth/sign-in".to_string()))
}

fn customer_nav() -> [MemoryElement; 3] {
    [
        MemoryElement::new(xpath("html/body/div[2]/div/nav/div/div/div[2]/div/a[2]"))
            .text("Pedidos")
            .on_click(ClickEffect::Navigate("/customer/orders".to_string())),
        MemoryElement::new(xpath("html/body/div[2]/div/nav/div/div/div[3]/button"))
            .text("Minha conta")
            .shown(Shown::SignedIn),
        MemoryElement::new(xpath("html/body/div[2]/div/nav/div/div/div[3]/div/div[2]/button"))
            .text("Sair")
            .shown(Shown::SignedIn)
            .on_click(ClickEffect::SignOut),
    ]
}

fn aside(orders_link: &str, orders_path: &str) -> [MemoryElement; 2] {
    [
        MemoryElement::new(xpath(orders_link))
            .text("Pedidos")
            .on_click(ClickEffect::Navigate(orders_path.to_string())),
        MemoryElement::new(xpath("html/body/div[2]/div/aside/nav/div[3]/div/button"))
            .text("Sair")
            .shown(Shown::SignedIn)
            .on_click(ClickEffect::SignOut),
    ]
}

fn order(id: &str, status: &str, restaurant: &str, customer: &str, price: &str, distance: &str) -> MemoryElement {
    let field = |class: &str, text: &str| MemoryElement::new(Selector::css(class)).text(text);
    MemoryElement::new(Selector::css(".order_item"))
        .child(field(".order_id", id))
        .child(field(".order_status", status))
        .child(field(".restaurant_name", restaurant))
        .child(field(".customer_name", customer))
        .child(field(".price", price))
        .child(field(".delivery_fee", distance))
}

fn orders_page(nav: impl IntoIterator<Item = MemoryElement>) -> MemoryDocument {
    let section = MemoryElement::new(Selector::css(".orders_section"))
        .child(order("#5676", "delivered", "McDonalds", "Carlos Mendes", "R$ 6.90", "1.8 km"))
        .child(order("#5677", "preparing", "Burger King", "Ana Souza", "R$ 32.50", "3.2 km"));
    nav.into_iter()
        .fold(MemoryDocument::new().title("Pedidos | ZipFood"), MemoryDocument::element)
        .element(section)
}

fn sign_in_page() -> MemoryDocument {
    let choice = |suffix: &str, label: &str, role: &str| {
        MemoryElement::new(xpath(&format!(
            "html/body/div[2]/div/div/div/div/div[2]/div/div/button{suffix}"
        )))
        .text(label)
        .on_click(ClickEffect::ChooseRole(role.to_string()))
    };

    MemoryDocument::new()
        .title("Entrar | ZipFood")
        .element(header())
        .element(choice("", "Cliente", "customer"))
        .element(choice("[2]", "Restaurante", "restaurant"))
        .element(choice("[3]", "Entregador", "delivery"))
        .element(form("div/div/input"))
        .element(form("div[2]/div/input"))
        .element(form("button").text("Entrar").on_click(ClickEffect::SignIn {
            email: form_sel("div/div/input"),
            password: form_sel("div[2]/div/input"),
        }))
        .element(
            MemoryElement::new(xpath("html/body/div[2]/div/div/div/div[2]/div/div[3]/div/p/a"))
                .text("Cadastre-se")
                .on_click(ClickEffect::Navigate("/auth/sign-up".to_string())),
        )
}

fn sign_up_page() -> MemoryDocument {
    MemoryDocument::new()
        .title("Cadastro | ZipFood")
        .element(header())
        .element(form("div/div/input"))
        .element(form("div[2]/div/input"))
        .element(form("div[3]/div/input"))
        .element(form("div[4]/div/input"))
        .element(form("button").text("Criar conta").on_click(ClickEffect::SignUp {
            name: form_sel("div/div/input"),
            email: form_sel("div[2]/div/input"),
            password: form_sel("div[3]/div/input"),
            confirm: form_sel("div[4]/div/input"),
        }))
}

/// The ZipFood app: landing page, auth pages, one dashboard per role
/// behind a role guard, order histories, and a page whose payment iframe
/// never finishes loading.
pub fn zipfood_site() -> MemorySite {
    let restaurant_orders = "html/body/div[2]/div/aside/nav/div/ul/li[3]/a";
    let delivery_orders = "html/body/div[2]/div/aside/nav/div/ul/li[2]/div/a";

    MemorySite::new(ORIGIN)
        .title("ZipFood")
        .route(
            "/",
            MemoryDocument::new()
                .element(header())
                .element(
                    MemoryElement::new(xpath("html/body/div[2]/div/main/div/div/button"))
                        .text("Peça agora")
                        .on_click(ClickEffect::Navigate("/auth/sign-in".to_string())),
                ),
        )
        .route("/auth/sign-in", sign_in_page())
        .route("/auth/sign-up", sign_up_page())
        .route(
            "/customer",
            customer_nav()
                .into_iter()
                .fold(MemoryDocument::new(), MemoryDocument::element)
                .element(MemoryElement::new(Selector::text("Restaurantes")).text("Restaurantes perto de você")),
        )
        .route("/customer/orders", orders_page(customer_nav()))
        .route(
            "/restaurant",
            aside(restaurant_orders, "/restaurant/orders")
                .into_iter()
                .fold(MemoryDocument::new(), MemoryDocument::element)
                .element(MemoryElement::new(Selector::text("Cardápio")).text("Cardápio")),
        )
        .route("/restaurant/orders", orders_page(aside(restaurant_orders, "/restaurant/orders")))
        .route(
            "/delivery",
            aside(delivery_orders, "/delivery/orders")
                .into_iter()
                .fold(MemoryDocument::new(), MemoryDocument::element)
                .element(MemoryElement::new(Selector::text("Entregas")).text("Entregas disponíveis")),
        )
        .route("/delivery/orders", orders_page(aside(delivery_orders, "/delivery/orders")))
        .route(
            "/checkout",
            MemoryDocument::new()
                .title("Pagamento | ZipFood")
                .element(MemoryElement::new(Selector::test_id("summary")).text("Resumo do pedido"))
                .frame(
                    MemoryFrame::named("payment")
                        .url("https://pay.zipfood.example/widget")
                        .never_ready()
                        .element(MemoryElement::new(Selector::test_id("pay")).text("Pagar")),
                ),
        )
        .guard("/customer", "customer")
        .guard("/restaurant", "restaurant")
        .guard("/delivery", "delivery")
        .account(EMAIL, PASSWORD, "customer")
}

/// Fast timeouts, no app server, artifacts under `output`.
pub fn config(output: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.base_url = ORIGIN.to_string();
    config.timeouts = Timeouts::fast();
    config.server.enabled = false;
    config.output.results_dir = output.to_path_buf();
    config.output.screenshots_dir = output.join("screenshots");
    config
}

pub fn engine(output: &Path) -> ScenarioEngine<MemoryFactory> {
    ScenarioEngine::new(MemoryFactory::new(zipfood_site()), config(output))
}

pub fn scenario(yaml: &str) -> Scenario {
    Scenario::from_yaml(yaml).expect("fixture scenario must parse")
}

pub fn scenarios_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/scenarios"))
}
