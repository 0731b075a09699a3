// =============================================================================
// KIS REST API Client — orders, cancels, quotations, rank endpoints
// =============================================================================
//
// SECURITY: the app secret and access token are never logged or serialized.
// Every call carries the bearer token plus appkey/appsecret headers and the
// endpoint's TR id.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use super::{BrokerApi, CancelAck, OrderAck};
use crate::stock::DailyBar;
use crate::types::OrderSide;

// TR ids (live trading; the demo host uses the VTTC variants).
const TR_ORDER_BUY: &str = "TTTC0802U";
const TR_ORDER_SELL: &str = "TTTC0801U";
const TR_ORDER_BUY_DEMO: &str = "VTTC0802U";
const TR_ORDER_SELL_DEMO: &str = "VTTC0801U";
const TR_ORDER_CANCEL: &str = "TTTC0803U";
const TR_ORDER_CANCEL_DEMO: &str = "VTTC0803U";
const TR_INQUIRE_PRICE: &str = "FHKST01010100";
const TR_DAILY_CHART: &str = "FHKST03010100";
const TR_RANK_DISPARITY: &str = "FHPST01780000";
const TR_RANK_FLUCTUATION: &str = "FHPST01700000";
const TR_RANK_VOLUME: &str = "FHPST01710000";
const TR_RANK_BULK_TRANS: &str = "FHKST190900C0";
const TR_OVERTIME_PRICE: &str = "FHPST02300000";

/// Account + credential material for the REST surface.
#[derive(Clone)]
pub struct KisCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub access_token: String,
    /// Account number (CANO).
    pub account_no: String,
    /// Account product code (ACNT_PRDT_CD), usually "01".
    pub account_product: String,
}

impl std::fmt::Debug for KisCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisCredentials")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("account_no", &"<redacted>")
            .finish()
    }
}

/// Current-price quotation, normalized.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PriceQuote {
    pub code: String,
    pub current_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub yesterday_close: f64,
    pub acc_volume: u64,
    pub yesterday_volume: u64,
    pub change_amount: f64,
    pub change_rate: f64,
    pub ask_price1: f64,
    pub bid_price1: f64,
    pub ask_qty1: u64,
    pub bid_qty1: u64,
    pub market_cap: f64,
}

/// One row from a rank endpoint, normalized to the fields the intraday
/// scanner consumes.
#[derive(Debug, Clone, Default)]
pub struct RankRow {
    pub code: String,
    pub name: String,
    /// 20-day disparity, percent (disparity rank).
    pub disparity_rate: f64,
    /// Change versus yesterday, percent (fluctuation rank).
    pub change_rate: f64,
    /// Volume increase rate, percent (volume rank).
    pub volume_increase_rate: f64,
    /// Accumulated trading value in won, when the endpoint carries it.
    pub trading_value: f64,
}

/// Overnight single-price session snapshot.
#[derive(Debug, Clone, Default)]
pub struct OvertimePrice {
    pub price: f64,
    pub volume: u64,
    pub trading_halt: bool,
}

pub struct KisClient {
    base_url: String,
    demo: bool,
    credentials: KisCredentials,
    client: reqwest::Client,
}

impl KisClient {
    pub fn new(base_url: impl Into<String>, demo: bool, credentials: KisCredentials) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            demo,
            credentials,
            client,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, tr_id: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", self.credentials.access_token))
            .header("appkey", &self.credentials.app_key)
            .header("appsecret", &self.credentials.app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
    }

    async fn read_json(resp: reqwest::Response, what: &str) -> Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response"))?;
        if !status.is_success() {
            anyhow::bail!("{what} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    async fn order_cash(&self, side: OrderSide, code: &str, qty: u32, price: f64) -> Result<OrderAck> {
        let tr_id = match (side, self.demo) {
            (OrderSide::Buy, false) => TR_ORDER_BUY,
            (OrderSide::Sell, false) => TR_ORDER_SELL,
            (OrderSide::Buy, true) => TR_ORDER_BUY_DEMO,
            (OrderSide::Sell, true) => TR_ORDER_SELL_DEMO,
        };
        let body = json!({
            "CANO": self.credentials.account_no,
            "ACNT_PRDT_CD": self.credentials.account_product,
            "PDNO": code,
            "ORD_DVSN": "00",
            "ORD_QTY": qty.to_string(),
            "ORD_UNPR": format!("{}", price as i64),
        });

        debug!(code, %side, qty, price, "placing cash order");
        let resp = self
            .request(reqwest::Method::POST, "/uapi/domestic-stock/v1/trading/order-cash", tr_id)
            .json(&body)
            .send()
            .await
            .context("order-cash request failed")?;
        let body = Self::read_json(resp, "order-cash").await?;

        let output = &body["output"];
        Ok(OrderAck {
            rt_cd: str_field(&body, "rt_cd"),
            msg_cd: str_field(&body, "msg_cd"),
            msg1: str_field(&body, "msg1"),
            order_no: str_field(output, "ODNO"),
            orgno: str_field(output, "KRX_FWDG_ORD_ORGNO"),
            order_time: str_field(output, "ORD_TMD"),
        })
    }

    async fn order_cancel(&self, orgno: &str, order_no: &str) -> Result<CancelAck> {
        let tr_id = if self.demo { TR_ORDER_CANCEL_DEMO } else { TR_ORDER_CANCEL };
        let body = json!({
            "CANO": self.credentials.account_no,
            "ACNT_PRDT_CD": self.credentials.account_product,
            "KRX_FWDG_ORD_ORGNO": orgno,
            "ORGN_ODNO": order_no,
            "ORD_DVSN": "00",
            "RVSE_CNCL_DVSN_CD": "02",
            "ORD_QTY": "0",
            "ORD_UNPR": "0",
            "QTY_ALL_ORD_YN": "Y",
        });

        debug!(order_no, orgno, "cancelling order");
        let resp = self
            .request(reqwest::Method::POST, "/uapi/domestic-stock/v1/trading/order-rvsecncl", tr_id)
            .json(&body)
            .send()
            .await
            .context("order-rvsecncl request failed")?;
        let body = Self::read_json(resp, "order-rvsecncl").await?;

        Ok(CancelAck {
            rt_cd: str_field(&body, "rt_cd"),
            msg_cd: str_field(&body, "msg_cd"),
            msg1: str_field(&body, "msg1"),
        })
    }

    // -------------------------------------------------------------------------
    // Quotations
    // -------------------------------------------------------------------------

    /// GET /quotations/inquire-price.
    pub async fn inquire_price(&self, code: &str) -> Result<PriceQuote> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/quotations/inquire-price",
                TR_INQUIRE_PRICE,
            )
            .query(&[("FID_COND_MRKT_DIV_CODE", "J"), ("FID_INPUT_ISCD", code)])
            .send()
            .await
            .context("inquire-price request failed")?;
        let body = Self::read_json(resp, "inquire-price").await?;
        let out = &body["output"];

        Ok(PriceQuote {
            code: code.to_string(),
            current_price: num_field(out, "stck_prpr"),
            open: num_field(out, "stck_oprc"),
            high: num_field(out, "stck_hgpr"),
            low: num_field(out, "stck_lwpr"),
            yesterday_close: num_field(out, "stck_sdpr"),
            acc_volume: num_field(out, "acml_vol") as u64,
            yesterday_volume: num_field(out, "prdy_vol") as u64,
            change_amount: num_field(out, "prdy_vrss"),
            change_rate: num_field(out, "prdy_ctrt"),
            ask_price1: num_field(out, "askp1"),
            bid_price1: num_field(out, "bidp1"),
            ask_qty1: num_field(out, "askp_rsqn1") as u64,
            bid_qty1: num_field(out, "bidp_rsqn1") as u64,
            market_cap: num_field(out, "hts_avls"),
        })
    }

    /// GET /quotations/inquire-daily-itemchartprice. Bars come newest-first.
    pub async fn daily_bars(&self, code: &str, count: usize) -> Result<Vec<DailyBar>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
                TR_DAILY_CHART,
            )
            .query(&[
                ("FID_COND_MRKT_DIV_CODE", "J"),
                ("FID_INPUT_ISCD", code),
                ("FID_PERIOD_DIV_CODE", "D"),
                ("FID_ORG_ADJ_PRC", "1"),
            ])
            .send()
            .await
            .context("daily chart request failed")?;
        let body = Self::read_json(resp, "inquire-daily-itemchartprice").await?;

        let rows = body["output2"].as_array().cloned().unwrap_or_default();
        let mut bars = Vec::with_capacity(rows.len().min(count));
        for row in rows.iter().take(count) {
            let close = num_field(row, "stck_clpr");
            if close <= 0.0 {
                continue;
            }
            bars.push(DailyBar {
                open: num_field(row, "stck_oprc"),
                high: num_field(row, "stck_hgpr"),
                low: num_field(row, "stck_lwpr"),
                close,
                volume: num_field(row, "acml_vol") as u64,
                trading_value: num_field(row, "acml_tr_pbmn"),
            });
        }
        debug!(code, count = bars.len(), "daily bars fetched");
        Ok(bars)
    }

    /// Overnight single-price session snapshot used by the pre-open scorer.
    pub async fn overtime_price(&self, code: &str) -> Result<OvertimePrice> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/quotations/inquire-overtime-price",
                TR_OVERTIME_PRICE,
            )
            .query(&[("FID_COND_MRKT_DIV_CODE", "J"), ("FID_INPUT_ISCD", code)])
            .send()
            .await
            .context("overtime price request failed")?;
        let body = Self::read_json(resp, "inquire-overtime-price").await?;
        let out = &body["output"];
        Ok(OvertimePrice {
            price: num_field(out, "ovtm_untp_prpr"),
            volume: num_field(out, "ovtm_untp_vol") as u64,
            trading_halt: str_field(out, "trht_yn").eq_ignore_ascii_case("Y"),
        })
    }

    // -------------------------------------------------------------------------
    // Rank endpoints (intraday scan)
    // -------------------------------------------------------------------------

    /// 20-day disparity rank, ascending (oversold first).
    pub async fn disparity_rank(&self) -> Result<Vec<RankRow>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/ranking/disparity",
                TR_RANK_DISPARITY,
            )
            .query(&[
                ("fid_input_iscd", "0001"),
                ("fid_rank_sort_cls_code", "1"),
                ("fid_hour_cls_code", "20"),
            ])
            .send()
            .await
            .context("disparity rank request failed")?;
        let body = Self::read_json(resp, "disparity rank").await?;
        Ok(rank_rows(&body, |row, out| {
            out.disparity_rate = num_field(row, "d20_dsrt");
        }))
    }

    /// Fluctuation rank, rising side.
    pub async fn fluctuation_rank(&self) -> Result<Vec<RankRow>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/ranking/fluctuation",
                TR_RANK_FLUCTUATION,
            )
            .query(&[
                ("fid_input_iscd", "0001"),
                ("fid_rank_sort_cls_code", "0"),
                ("fid_rsfl_rate1", "0.2"),
                ("fid_rsfl_rate2", "12.0"),
            ])
            .send()
            .await
            .context("fluctuation rank request failed")?;
        let body = Self::read_json(resp, "fluctuation rank").await?;
        Ok(rank_rows(&body, |row, out| {
            out.change_rate = num_field(row, "prdy_ctrt");
        }))
    }

    /// Volume-increase rank.
    pub async fn volume_rank(&self) -> Result<Vec<RankRow>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/quotations/volume-rank",
                TR_RANK_VOLUME,
            )
            .query(&[("fid_input_iscd", "0001"), ("fid_blng_cls_code", "1")])
            .send()
            .await
            .context("volume rank request failed")?;
        let body = Self::read_json(resp, "volume rank").await?;
        Ok(rank_rows(&body, |row, out| {
            out.volume_increase_rate = num_field(row, "vol_inrt");
        }))
    }

    /// Buy-side bulk contract intensity rank.
    pub async fn bulk_trans_rank(&self) -> Result<Vec<RankRow>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                "/uapi/domestic-stock/v1/ranking/bulk-trans-num",
                TR_RANK_BULK_TRANS,
            )
            .query(&[("fid_input_iscd", "0001"), ("fid_rank_sort_cls_code", "0")])
            .send()
            .await
            .context("bulk-trans rank request failed")?;
        let body = Self::read_json(resp, "bulk-trans rank").await?;
        Ok(rank_rows(&body, |_, _| {}))
    }
}

impl BrokerApi for KisClient {
    async fn place_order(&self, side: OrderSide, code: &str, qty: u32, price: f64) -> Result<OrderAck> {
        self.order_cash(side, code, qty, price).await
    }

    async fn cancel_order(&self, orgno: &str, order_no: &str) -> Result<CancelAck> {
        self.order_cancel(orgno, order_no).await
    }
}

impl std::fmt::Debug for KisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisClient")
            .field("base_url", &self.base_url)
            .field("demo", &self.demo)
            .field("credentials", &self.credentials)
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn str_field(value: &serde_json::Value, name: &str) -> String {
    value.get(name).and_then(|v| v.as_str()).unwrap_or_default().trim().to_string()
}

/// Numeric field that may arrive as a string or a number.
fn num_field(value: &serde_json::Value, name: &str) -> f64 {
    match value.get(name) {
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(v) => v.as_f64().unwrap_or(0.0),
        None => 0.0,
    }
}

fn rank_rows(body: &serde_json::Value, fill: impl Fn(&serde_json::Value, &mut RankRow)) -> Vec<RankRow> {
    let rows = body["output"].as_array().cloned().unwrap_or_default();
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let code = str_field(row, "mksc_shrn_iscd");
        if code.is_empty() {
            warn!("rank row without symbol code, skipping");
            continue;
        }
        let mut rank = RankRow {
            code,
            name: str_field(row, "hts_kor_isnm"),
            trading_value: num_field(row, "acml_tr_pbmn"),
            ..RankRow::default()
        };
        fill(row, &mut rank);
        out.push(rank);
    }
    out
}
