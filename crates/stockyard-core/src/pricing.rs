//! # Auto Pricing
//!
//! Derives selling prices from an item's purchase price.
//!
//! ## Where It Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_item / update_item / import_items / recalculate_auto_pricing    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  apply_auto_pricing(incoming, existing, force, calculator)              │
//! │        │                                                                │
//! │        ├── no purchase price anywhere  → incoming untouched             │
//! │        ├── hand-entered prices present → auto_pricing = false           │
//! │        └── otherwise                   → calculator.calculate(cost)     │
//! │                                          fills list/cash/transfer/ml    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The business formula lives behind [`PricingCalculator`]. The bundled
//! [`TieredMarkupCalculator`] is a plain margin + surcharge model with
//! tiered rounding, good enough for stores without a custom formula.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::CatalogItem;

// =============================================================================
// Calculator Seam
// =============================================================================

/// Prices produced for one purchase price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedFields {
    pub list_price: Money,
    pub cash_price: Money,
    pub transfer_price: Money,
    pub transfer_net_price: Money,
    pub ml_price: Option<Money>,
    pub ml3c_price: Option<Money>,
    pub ml6c_price: Option<Money>,
}

/// Pure pricing function supplied by the host application.
pub trait PricingCalculator: Send + Sync {
    fn calculate(&self, purchase_price: Money) -> PricedFields;
}

// =============================================================================
// Default Calculator
// =============================================================================

/// Rounding step for prices up to `max_cents` (inclusive); `None` is the
/// open-ended last tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CostTier {
    pub max_cents: Option<i64>,
    pub round_step_cents: i64,
}

/// Percentages (basis points) used by [`TieredMarkupCalculator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricingSettings {
    /// Target gain over cost.
    pub margin_bps: i64,
    /// Store operating cost, charged on the purchase price.
    pub operating_bps: i64,
    /// Card installment surcharge folded into the list price.
    pub installments_bps: i64,
    /// Retention withheld from bank transfers.
    pub transfer_retention_bps: i64,
    /// Marketplace commission; `None` disables marketplace prices.
    pub marketplace_commission_bps: Option<i64>,
    pub marketplace_3_installments_bps: i64,
    pub marketplace_6_installments_bps: i64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            margin_bps: 5_000,
            operating_bps: 500,
            installments_bps: 1_500,
            transfer_retention_bps: 300,
            marketplace_commission_bps: Some(1_300),
            marketplace_3_installments_bps: 900,
            marketplace_6_installments_bps: 1_600,
        }
    }
}

/// Margin + surcharges, rounded up by price tier.
#[derive(Debug, Clone)]
pub struct TieredMarkupCalculator {
    settings: PricingSettings,
    tiers: Vec<CostTier>,
}

impl TieredMarkupCalculator {
    pub fn new(settings: PricingSettings, mut tiers: Vec<CostTier>) -> Self {
        // bounded tiers ascending, open-ended tier last
        tiers.sort_by_key(|t| t.max_cents.unwrap_or(i64::MAX));
        Self { settings, tiers }
    }

    /// 50 / 100 / 200 / 500 unit steps at the 1 500 / 3 000 / 5 000 marks.
    pub fn default_tiers() -> Vec<CostTier> {
        vec![
            CostTier {
                max_cents: Some(150_000),
                round_step_cents: 5_000,
            },
            CostTier {
                max_cents: Some(300_000),
                round_step_cents: 10_000,
            },
            CostTier {
                max_cents: Some(500_000),
                round_step_cents: 20_000,
            },
            CostTier {
                max_cents: None,
                round_step_cents: 50_000,
            },
        ]
    }

    pub fn settings(&self) -> &PricingSettings {
        &self.settings
    }

    fn round_by_tier(&self, value: Money) -> Money {
        let step = self
            .tiers
            .iter()
            .find(|t| t.max_cents.map_or(true, |max| value.cents() <= max))
            .map_or(1, |t| t.round_step_cents);
        value.round_up_to(step)
    }
}

impl Default for TieredMarkupCalculator {
    fn default() -> Self {
        Self::new(PricingSettings::default(), Self::default_tiers())
    }
}

impl PricingCalculator for TieredMarkupCalculator {
    fn calculate(&self, purchase_price: Money) -> PricedFields {
        let s = &self.settings;
        let base = purchase_price.increase_bps(s.margin_bps) + purchase_price.portion_bps(s.operating_bps);

        let list_price = self.round_by_tier(base.increase_bps(s.installments_bps));
        let cash_price = self.round_by_tier(base);
        let transfer_price = cash_price;
        let transfer_net_price = transfer_price.decrease_bps(s.transfer_retention_bps);

        let (ml_price, ml3c_price, ml6c_price) = match s.marketplace_commission_bps {
            Some(commission) => {
                let ml = self.round_by_tier(list_price.increase_bps(commission));
                (
                    Some(ml),
                    Some(self.round_by_tier(ml.increase_bps(s.marketplace_3_installments_bps))),
                    Some(self.round_by_tier(ml.increase_bps(s.marketplace_6_installments_bps))),
                )
            }
            None => (None, None, None),
        };

        PricedFields {
            list_price,
            cash_price,
            transfer_price,
            transfer_net_price,
            ml_price,
            ml3c_price,
            ml6c_price,
        }
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Decides whether `incoming` is auto-priced and fills its prices if so.
///
/// ## Arguments
/// * `incoming` - The item as the caller wants it written
/// * `existing` - The stored version, when updating
/// * `force` - Recompute even if hand-entered prices are present
///
/// ## Returns
/// The item to write. Without any purchase price it is returned unchanged.
pub fn apply_auto_pricing(
    mut incoming: CatalogItem,
    existing: Option<&CatalogItem>,
    force: bool,
    calculator: &dyn PricingCalculator,
) -> CatalogItem {
    let Some(purchase) = incoming
        .purchase_price
        .or_else(|| existing.and_then(|e| e.purchase_price))
    else {
        return incoming;
    };

    let should_auto = if force {
        true
    } else if incoming.has_manual_prices() {
        false
    } else if incoming.auto_pricing {
        true
    } else if let Some(existing) = existing {
        existing.auto_pricing
    } else {
        true
    };

    if !should_auto {
        incoming.auto_pricing = false;
        return incoming;
    }

    let priced = calculator.calculate(Money::from_cents(purchase));
    incoming.list_price = Some(priced.list_price.cents());
    incoming.cash_price = Some(priced.cash_price.cents());
    incoming.transfer_price = Some(priced.transfer_price.cents());
    incoming.transfer_net_price = Some(priced.transfer_net_price.cents());
    incoming.ml_price = priced.ml_price.map(|m| m.cents());
    incoming.ml3c_price = priced.ml3c_price.map(|m| m.cents());
    incoming.ml6c_price = priced.ml6c_price.map(|m| m.cents());
    incoming.price = incoming.price.or(Some(priced.list_price.cents()));
    incoming.auto_pricing = true;
    incoming
}

/// True when two items carry identical price columns.
pub fn same_prices(a: &CatalogItem, b: &CatalogItem) -> bool {
    a.price == b.price
        && a.list_price == b.list_price
        && a.cash_price == b.cash_price
        && a.transfer_price == b.transfer_price
        && a.transfer_net_price == b.transfer_net_price
        && a.ml_price == b.ml_price
        && a.ml3c_price == b.ml3c_price
        && a.ml6c_price == b.ml6c_price
        && a.auto_pricing == b.auto_pricing
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Cost plus a flat 100 cents everywhere.
    struct FlatCalculator;

    impl PricingCalculator for FlatCalculator {
        fn calculate(&self, purchase_price: Money) -> PricedFields {
            let p = purchase_price + Money::from_cents(100);
            PricedFields {
                list_price: p,
                cash_price: p,
                transfer_price: p,
                transfer_net_price: p,
                ml_price: None,
                ml3c_price: None,
                ml6c_price: None,
            }
        }
    }

    #[test]
    fn test_no_purchase_price_leaves_item_alone() {
        let item = CatalogItem::new("Widget");
        let out = apply_auto_pricing(item.clone(), None, true, &FlatCalculator);
        assert_eq!(out, item);
    }

    #[test]
    fn test_new_item_without_manual_prices_is_auto_priced() {
        let item = CatalogItem::new("Widget").with_purchase_price(1_000);
        let out = apply_auto_pricing(item, None, false, &FlatCalculator);
        assert!(out.auto_pricing);
        assert_eq!(out.list_price, Some(1_100));
        assert_eq!(out.price, Some(1_100));
    }

    #[test]
    fn test_manual_prices_disable_auto_pricing() {
        let mut item = CatalogItem::new("Widget").with_purchase_price(1_000);
        item.auto_pricing = true;
        item.cash_price = Some(5_000);
        let out = apply_auto_pricing(item, None, false, &FlatCalculator);
        assert!(!out.auto_pricing);
        assert_eq!(out.cash_price, Some(5_000));
        assert_eq!(out.list_price, None);
    }

    #[test]
    fn test_existing_flag_decides_and_force_overrides() {
        let mut existing = CatalogItem::new("Widget").with_purchase_price(1_000);
        existing.auto_pricing = false;
        let incoming = CatalogItem::new("Widget");

        let out = apply_auto_pricing(incoming.clone(), Some(&existing), false, &FlatCalculator);
        assert!(!out.auto_pricing);
        assert_eq!(out.list_price, None);

        let mut manual = incoming;
        manual.list_price = Some(9_999);
        let out = apply_auto_pricing(manual, Some(&existing), true, &FlatCalculator);
        assert!(out.auto_pricing);
        assert_eq!(out.list_price, Some(1_100));
    }

    #[test]
    fn test_counter_price_is_kept_when_present() {
        let mut item = CatalogItem::new("Widget").with_purchase_price(1_000);
        item.price = Some(4_200);
        let out = apply_auto_pricing(item, None, true, &FlatCalculator);
        assert_eq!(out.price, Some(4_200));
        assert_eq!(out.list_price, Some(1_100));
    }

    #[test]
    fn test_tiered_calculator_rounds_up() {
        let calc = TieredMarkupCalculator::default();
        let priced = calc.calculate(Money::from_cents(100_000));

        // 1000.00 + 50% margin + 5% operating = 1550.00, rounded to 100.00 steps
        assert_eq!(priced.cash_price.cents(), 160_000);
        assert_eq!(priced.transfer_price, priced.cash_price);
        assert!(priced.list_price > priced.cash_price);
        assert!(priced.transfer_net_price < priced.transfer_price);
        assert_eq!(priced.list_price.cents() % 10_000, 0);

        let ml = priced.ml_price.unwrap();
        assert!(priced.ml3c_price.unwrap() >= ml);
        assert!(priced.ml6c_price.unwrap() >= priced.ml3c_price.unwrap());
    }

    #[test]
    fn test_marketplace_prices_can_be_disabled() {
        let settings = PricingSettings {
            marketplace_commission_bps: None,
            ..Default::default()
        };
        let calc = TieredMarkupCalculator::new(settings, TieredMarkupCalculator::default_tiers());
        let priced = calc.calculate(Money::from_cents(2_000));
        assert_eq!(priced.ml_price, None);
        assert_eq!(priced.ml6c_price, None);
    }
}
