//! Converting USD to BTC through a quote and back at its rate recovers the
//! original amount within fee tolerance.

use paidin_core::Conversion;
use paidin_providers::StrikeApi;
use paidin_providers::mock::{MockStrike, SandboxLightning};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_quote_round_trip(cents in 100i64..=100_000_000, price in 1_000i64..=500_000) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let amount_usd = Decimal::new(cents, 2);
        let usd_per_btc = Decimal::from(price);

        let quote = runtime.block_on(async {
            let strike = MockStrike::new(SandboxLightning::new());
            strike.set_price(usd_per_btc).await;
            strike.create_quote(amount_usd).await.unwrap()
        });

        prop_assert!(quote.btc_amount() > Decimal::ZERO);
        let back = quote.btc_amount() * quote.usd_per_btc();
        let drift = (back - amount_usd).abs() / amount_usd;
        prop_assert!(drift <= dec!(0.01), "drift {} for {} at {}", drift, amount_usd, usd_per_btc);

        let conversion = Conversion::completed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            quote.id.clone(),
            quote.usd_amount(),
            quote.btc_amount(),
            quote.usd_per_btc(),
        );
        prop_assert!(conversion.is_consistent(dec!(0.01)));
    }
}
