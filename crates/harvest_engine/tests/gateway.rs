use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use harvest_core::RegionPath;
use harvest_engine::{
    ApiError, ApiErrorKind, ApiGateway, CookieRecord, Credential, GatewaySettings, Pacer,
    ReqwestGateway, Unpaced,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{any, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILTER_PATH: &str = "/bnmpportal/api/pesquisa-pecas/filter";

fn gateway(server: &MockServer) -> ReqwestGateway {
    ReqwestGateway::new(GatewaySettings {
        base_url: server.uri(),
        ..GatewaySettings::default()
    })
    .unwrap()
}

fn credential() -> Credential {
    Credential::new(
        vec![
            CookieRecord::new("portalbnmp", "abc")
                .expiring_at(Utc::now() + Duration::hours(1)),
            CookieRecord::new("JSESSIONID", "xyz"),
        ],
        Some("fp-1".to_string()),
    )
}

#[derive(Default)]
struct CountingPacer(AtomicUsize);

#[async_trait::async_trait]
impl Pacer for CountingPacer {
    async fn pause(&self) -> Result<(), ApiError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn page_body(first_id: u64, count: u64, total: u64, size: u32, number: u32) -> Value {
    let content: Vec<Value> = (first_id..first_id + count)
        .map(|id| json!({ "id": id, "idTipoPeca": 1 }))
        .collect();
    json!({
        "content": content,
        "totalElements": total,
        "totalPages": total.div_ceil(u64::from(size)),
        "size": size,
        "number": number,
    })
}

#[tokio::test]
async fn listings_attach_session_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bnmpportal/api/dominio/estados"))
        .and(header("cookie", "JSESSIONID=xyz; portalbnmp=abc"))
        .and(header("fingerprint", "fp-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "nome": "Acre", "sigla": "AC" },
            { "id": 2, "nome": "Alagoas", "sigla": "AL" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bnmpportal/api/dominio/por-uf/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": 10, "nome": "Rio Branco" }])),
        )
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let states = gateway.list_states(&credential()).await.unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[1].abbrev.as_deref(), Some("AL"));
    assert_eq!(states[0].name, "Acre");

    let municipalities = gateway.list_municipalities(&credential(), 1).await.unwrap();
    assert_eq!(municipalities[0].id, 10);
    assert_eq!(municipalities[0].parent_state, Some(1));
}

#[tokio::test]
async fn expired_credential_fails_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let expired = Credential::new(
        vec![CookieRecord::new("portalbnmp", "abc").expiring_at(Utc::now() - Duration::minutes(1))],
        None,
    );

    let err = gateway(&server).list_states(&expired).await.unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::AuthExpired);
}

#[tokio::test]
async fn http_failures_are_classified() {
    let server = MockServer::start().await;
    for (state_id, status) in [(1, 401), (2, 403), (3, 429), (4, 404), (5, 503), (6, 418)] {
        Mock::given(method("GET"))
            .and(path(format!("/bnmpportal/api/dominio/por-uf/{state_id}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/bnmpportal/api/dominio/por-uf/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let mut kinds = Vec::new();
    for state_id in 1..=7 {
        let err = gateway
            .list_municipalities(&credential(), state_id)
            .await
            .unwrap_err();
        kinds.push(err.kind);
    }
    assert_eq!(
        kinds,
        vec![
            ApiErrorKind::AuthExpired,
            ApiErrorKind::AuthExpired,
            ApiErrorKind::RateLimited,
            ApiErrorKind::NotFound,
            ApiErrorKind::Transient,
            ApiErrorKind::Rejected(418),
            ApiErrorKind::Malformed,
        ]
    );
}

#[tokio::test]
async fn fetch_page_posts_the_region_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FILTER_PATH))
        .and(query_param("page", "2"))
        .and(query_param("size", "30"))
        .and(body_json(json!({
            "buscaOrgaoRecursivo": false,
            "orgaoExpeditor": {},
            "idEstado": 5,
            "idMunicipio": 7
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(61, 30, 100, 30, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let page = gateway(&server)
        .fetch_page(&credential(), RegionPath::municipality(5, 7), 2, 30, &Unpaced)
        .await
        .unwrap();
    assert_eq!(page.total_elements, 100);
    assert_eq!(page.content.len(), 30);
    assert_eq!(page.number, 2);
}

#[tokio::test]
async fn rejected_page_is_refetched_as_smaller_pages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FILTER_PATH))
        .and(query_param("size", "30"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    for (sub_page, first_id, count) in [(2, 31, 15), (3, 46, 5)] {
        Mock::given(method("POST"))
            .and(path(FILTER_PATH))
            .and(query_param("page", sub_page.to_string()))
            .and(query_param("size", "15"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page_body(first_id, count, 50, 15, sub_page)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let pacer = CountingPacer::default();
    let page = gateway(&server)
        .fetch_page(&credential(), RegionPath::state(1), 1, 30, &pacer)
        .await
        .unwrap();
    // One wait before each of the two sub-page requests.
    assert_eq!(pacer.0.load(Ordering::SeqCst), 2);

    let ids: Vec<u64> = page
        .content
        .iter()
        .map(|item| item["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (31..=50).collect::<Vec<_>>());
    assert_eq!(page.number, 1);
    assert_eq!(page.size, 30);
    assert_eq!(page.total_elements, 50);
}

#[tokio::test]
async fn degradation_stops_at_the_floor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FILTER_PATH))
        .respond_with(ResponseTemplate::new(413))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .fetch_page(&credential(), RegionPath::state(1), 0, 10, &Unpaced)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Rejected(413));
}

#[tokio::test]
async fn case_json_collects_every_page() {
    let server = MockServer::start().await;
    let filter = json!({
        "buscaOrgaoRecursivo": false,
        "orgaoExpeditor": {},
        "numeroProcesso": "00010706320158100001"
    });
    for (number, first_id, count) in [(0, 1, 10), (1, 11, 2)] {
        Mock::given(method("POST"))
            .and(path(FILTER_PATH))
            .and(query_param("page", number.to_string()))
            .and(query_param("size", "10"))
            .and(body_json(filter.clone()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page_body(first_id, count, 12, 10, number)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let pacer = CountingPacer::default();
    let page = gateway(&server)
        .fetch_case_json(&credential(), "00010706320158100001", &pacer)
        .await
        .unwrap();
    assert_eq!(page.content.len(), 12);
    assert_eq!(pacer.0.load(Ordering::SeqCst), 1);
    assert_eq!(page.total_elements, 12);
}

#[tokio::test]
async fn certificate_must_be_a_pdf() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bnmpportal/api/certidaos/relatorio/5/1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF-1.4 body", "application/pdf"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bnmpportal/api/certidaos/relatorio/6/1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>error</html>", "text/html"))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let pdf = gateway.fetch_certificate(&credential(), 5, 1).await.unwrap();
    assert_eq!(pdf, b"%PDF-1.4 body");

    let err = gateway.fetch_certificate(&credential(), 6, 1).await.unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Malformed);
}

#[tokio::test]
async fn csv_export_returns_raw_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bnmpportal/api/pesquisa-pecas/csv"))
        .and(query_param("page", "0"))
        .and(body_json(json!({
            "buscaOrgaoRecursivo": false,
            "orgaoExpeditor": {},
            "idEstado": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw("Número,Nome\n1,Ana\n", "text/csv"))
        .mount(&server)
        .await;

    let bytes = gateway(&server)
        .fetch_csv_export(&credential(), 3)
        .await
        .unwrap();
    assert_eq!(bytes, "Número,Nome\n1,Ana\n".as_bytes());
}
