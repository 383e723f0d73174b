use chrono::NaiveDate;
use ledger_period::{
    Account, BalanceAggregator, EngineConfig, FixedClock, InMemoryStore, Movement, PayerRef,
    Period, PeriodEngine,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

const USER: &str = "ana";

fn p(raw: &str) -> Period {
    raw.parse().expect("period")
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("date")
}

fn engine_on(today: NaiveDate) -> PeriodEngine<InMemoryStore> {
    PeriodEngine::with_clock(InMemoryStore::new(), FixedClock::on(today))
}

struct Ledger {
    admin: PayerRef,
    account: Account,
    movements: Vec<Movement>,
}

/// 1000 opening, -200 settled in January, +500 pending in February.
fn basic_ledger() -> Ledger {
    let admin = PayerRef::admin(Uuid::new_v4());
    let account = Account::new(dec!(1000));
    let movements = vec![
        Movement::expense(dec!(200), p("2024-01"))
            .on_account(account.id)
            .paid_by(admin)
            .settled(),
        Movement::income(dec!(500), p("2024-02"))
            .on_account(account.id)
            .paid_by(admin),
    ];
    Ledger {
        admin,
        account,
        movements,
    }
}

#[test]
fn realized_and_projected_balances_per_target_period() {
    let ledger = basic_ledger();
    let engine = engine_on(d(2024, 2, 15));
    engine
        .store()
        .insert_account(USER, ledger.account.clone())
        .expect("account");
    engine
        .store()
        .insert_movements(USER, ledger.movements.clone())
        .expect("movements");

    let feb = engine.accounts_snapshot(USER, p("2024-02")).expect("snapshot");
    assert_eq!(feb.total_realized, dec!(800));
    assert_eq!(feb.total_projected, dec!(1300));
    assert_eq!(feb.card_forecast, Decimal::ZERO);
    assert_eq!(feb.skipped_rows, 0);
    assert_eq!(feb.per_account.len(), 1);
    assert_eq!(feb.per_account[0].realized_balance, dec!(800));
    assert_eq!(feb.per_account[0].projected_balance, dec!(1300));

    let jan = engine.accounts_snapshot(USER, p("2024-01")).expect("snapshot");
    assert_eq!(jan.total_realized, dec!(800));
    assert_eq!(jan.total_projected, dec!(800));

    let dec_2023 = engine.accounts_snapshot(USER, p("2023-12")).expect("snapshot");
    assert_eq!(dec_2023.total_projected, dec!(1000));
}

#[test]
fn projected_delta_between_periods_is_the_net_of_the_later_period() {
    let mut ledger = basic_ledger();
    ledger.movements.push(
        Movement::expense(dec!(75.50), p("2024-02"))
            .on_account(ledger.account.id)
            .paid_by(ledger.admin)
            .settled(),
    );
    ledger.movements.push(
        Movement::income(dec!(40), p("2024-03"))
            .on_account(ledger.account.id)
            .paid_by(ledger.admin),
    );

    let config = EngineConfig::default();
    let agg = BalanceAggregator::new(&config);
    let accounts = vec![ledger.account.clone()];
    let today = d(2024, 2, 15);

    for raw in ["2024-01", "2024-02", "2024-03", "2024-04"] {
        let period = p(raw);
        let now = agg.snapshot(&accounts, &ledger.movements, &[], period, today);
        let before = agg.snapshot(&accounts, &ledger.movements, &[], period.previous(), today);
        let net = agg.net_movements_in_period(ledger.account.id, &ledger.movements, period);
        assert_eq!(
            now.per_account[0].projected_balance - before.per_account[0].projected_balance,
            net,
            "{raw}"
        );
    }
}

#[test]
fn snapshot_is_deterministic_regardless_of_input_order() {
    let mut ledger = basic_ledger();
    let second = Account::new(dec!(1300));
    ledger.movements.push(
        Movement::expense(dec!(10), p("2024-02"))
            .on_account(second.id)
            .paid_by(ledger.admin),
    );
    let accounts = vec![ledger.account.clone(), second.clone()];

    let config = EngineConfig::default();
    let agg = BalanceAggregator::new(&config);
    let today = d(2024, 2, 15);
    let first = agg.snapshot(&accounts, &ledger.movements, &[], p("2024-02"), today);
    let again = agg.snapshot(&accounts, &ledger.movements, &[], p("2024-02"), today);
    assert_eq!(first, again);

    let mut reversed_movements = ledger.movements.clone();
    reversed_movements.reverse();
    let reversed_accounts: Vec<Account> = accounts.iter().rev().cloned().collect();
    let reordered = agg.snapshot(&reversed_accounts, &reversed_movements, &[], p("2024-02"), today);
    assert_eq!(first, reordered);

    // 1300 vs 1290: highest projected balance first.
    assert_eq!(first.per_account[0].id, ledger.account.id);
    assert_eq!(first.per_account[1].id, second.id);
}

#[test]
fn hidden_accounts_are_listed_but_never_totaled() {
    let ledger = basic_ledger();
    let hidden = Account::new(dec!(5000)).hidden();
    let mut movements = ledger.movements.clone();
    movements.push(
        Movement::expense(dec!(100), p("2024-01"))
            .on_account(hidden.id)
            .paid_by(ledger.admin)
            .settled(),
    );

    let config = EngineConfig::default();
    let snapshot = BalanceAggregator::new(&config).snapshot(
        &[ledger.account.clone(), hidden.clone()],
        &movements,
        &[],
        p("2024-02"),
        d(2024, 2, 15),
    );

    assert_eq!(snapshot.total_realized, dec!(800));
    assert_eq!(snapshot.total_projected, dec!(1300));
    let hidden_row = snapshot
        .per_account
        .iter()
        .find(|a| a.id == hidden.id)
        .expect("hidden account listed");
    assert!(hidden_row.exclude_from_balance);
    assert_eq!(hidden_row.realized_balance, dec!(4900));
}

#[test]
fn only_administrative_payers_count() {
    let ledger = basic_ledger();
    let mut movements = ledger.movements.clone();
    movements.push(
        Movement::expense(dec!(900), p("2024-01"))
            .on_account(ledger.account.id)
            .paid_by(PayerRef::shared(Uuid::new_v4()))
            .settled(),
    );
    movements.push(
        Movement::expense(dec!(33), p("2024-01"))
            .on_account(ledger.account.id)
            .settled(),
    );

    let config = EngineConfig::default();
    let snapshot = BalanceAggregator::new(&config).snapshot(
        &[ledger.account.clone()],
        &movements,
        &[],
        p("2024-02"),
        d(2024, 2, 15),
    );
    assert_eq!(snapshot.total_realized, dec!(800));
    assert_eq!(snapshot.total_projected, dec!(1300));
}

#[test]
fn opening_balance_movement_is_not_counted_twice() {
    let ledger = basic_ledger();
    let mut movements = ledger.movements.clone();
    movements.push(
        Movement::income(dec!(1000), p("2023-12"))
            .on_account(ledger.account.id)
            .paid_by(ledger.admin)
            .settled()
            .with_note("Opening balance"),
    );

    let config = EngineConfig::default();
    let snapshot = BalanceAggregator::new(&config).snapshot(
        &[ledger.account.clone()],
        &movements,
        &[],
        p("2024-02"),
        d(2024, 2, 15),
    );
    assert_eq!(snapshot.total_realized, dec!(800));
    assert_eq!(snapshot.total_projected, dec!(1300));
}

#[test]
fn transfers_move_account_balances() {
    let ledger = basic_ledger();
    let savings = Account::new(Decimal::ZERO);
    let mut movements = ledger.movements.clone();
    movements.push(
        Movement::transfer(dec!(-300), p("2024-01"))
            .on_account(ledger.account.id)
            .paid_by(ledger.admin)
            .settled(),
    );
    movements.push(
        Movement::transfer(dec!(300), p("2024-01"))
            .on_account(savings.id)
            .paid_by(ledger.admin)
            .settled(),
    );

    let config = EngineConfig::default();
    let snapshot = BalanceAggregator::new(&config).snapshot(
        &[ledger.account.clone(), savings.clone()],
        &movements,
        &[],
        p("2024-01"),
        d(2024, 2, 15),
    );
    let checking = snapshot
        .per_account
        .iter()
        .find(|a| a.id == ledger.account.id)
        .expect("checking");
    assert_eq!(checking.realized_balance, dec!(500));
    assert_eq!(snapshot.total_realized, dec!(800));
}

#[test]
fn card_only_expenses_are_forecast_for_future_periods_only() {
    let ledger = basic_ledger();
    let card = Uuid::new_v4();
    let mut movements = ledger.movements.clone();
    movements.extend([
        Movement::expense(dec!(30), p("2024-01"))
            .on_card(card)
            .paid_by(ledger.admin),
        Movement::expense(dec!(120), p("2024-03"))
            .on_card(card)
            .paid_by(ledger.admin),
        Movement::expense(dec!(80), p("2024-05"))
            .on_card(card)
            .paid_by(ledger.admin),
        Movement::expense(dec!(999), p("2024-03"))
            .on_card(card)
            .paid_by(ledger.admin)
            .with_note("INVOICE PAYMENT 2024-02"),
        Movement::expense(dec!(444), p("2024-03"))
            .on_card(card)
            .paid_by(PayerRef::shared(Uuid::new_v4())),
        // Card purchase debited from an account is already in the account balance.
        Movement::expense(dec!(55), p("2024-03"))
            .on_card(card)
            .on_account(ledger.account.id)
            .paid_by(ledger.admin),
    ]);

    let engine = engine_on(d(2024, 2, 15));
    engine
        .store()
        .insert_account(USER, ledger.account.clone())
        .expect("account");
    engine
        .store()
        .insert_movements(USER, movements)
        .expect("movements");

    let past = engine.accounts_snapshot(USER, p("2024-01")).expect("snapshot");
    assert_eq!(past.card_forecast, Decimal::ZERO);

    let current = engine.accounts_snapshot(USER, p("2024-02")).expect("snapshot");
    assert_eq!(current.card_forecast, Decimal::ZERO);
    assert_eq!(current.total_projected, dec!(1300));

    let march = engine.accounts_snapshot(USER, p("2024-03")).expect("snapshot");
    assert_eq!(march.card_forecast, dec!(-150));
    assert_eq!(march.total_projected, dec!(1300) - dec!(55) - dec!(150));
    assert_eq!(march.per_account[0].projected_balance, dec!(1245));

    let may = engine.accounts_snapshot(USER, p("2024-05")).expect("snapshot");
    assert_eq!(may.card_forecast, dec!(-230));
}

#[test]
fn unreadable_rows_are_skipped_and_counted() {
    let ledger = basic_ledger();
    let mut broken = Account::new(Decimal::ZERO);
    broken.initial_balance = None;
    let mut movements = ledger.movements.clone();
    let mut unreadable = Movement::expense(dec!(1), p("2024-01"))
        .on_account(ledger.account.id)
        .paid_by(ledger.admin)
        .settled();
    unreadable.amount = None;
    movements.push(unreadable);
    movements.push(
        Movement::income(dec!(20), p("2024-01"))
            .on_account(broken.id)
            .paid_by(ledger.admin)
            .settled(),
    );

    let config = EngineConfig::default();
    let snapshot = BalanceAggregator::new(&config).snapshot(
        &[ledger.account.clone(), broken.clone()],
        &movements,
        &[],
        p("2024-02"),
        d(2024, 2, 15),
    );
    assert_eq!(snapshot.skipped_rows, 2);
    assert_eq!(snapshot.total_realized, dec!(820));
    assert_eq!(snapshot.total_projected, dec!(1320));
}

#[test]
fn request_scope_memoizes_snapshots_per_period() {
    let ledger = basic_ledger();
    let engine = engine_on(d(2024, 2, 15));
    engine
        .store()
        .insert_account(USER, ledger.account.clone())
        .expect("account");
    engine
        .store()
        .insert_movements(USER, ledger.movements.clone())
        .expect("movements");

    let scope = engine.scope(USER).expect("scope");
    let first = scope.snapshot(p("2024-02")).expect("snapshot");
    let second = scope.snapshot(p("2024-02")).expect("snapshot");
    let _ = scope.snapshot(p("2024-01")).expect("snapshot");
    assert_eq!(first, second);
    assert_eq!(scope.memoized_periods(), 2);
    assert_eq!(scope.today(), d(2024, 2, 15));
    assert_eq!(scope.accounts().len(), 1);
    assert_eq!(scope.movements().len(), 2);
}

#[test]
fn card_metrics_compare_with_the_previous_period() {
    let admin = PayerRef::admin(Uuid::new_v4());
    let visible = Account::new(dec!(1000));
    let hidden = Account::new(dec!(500)).hidden();
    let card = Uuid::new_v4();
    let movements = vec![
        Movement::income(dec!(3000), p("2024-02"))
            .on_account(visible.id)
            .paid_by(admin)
            .settled(),
        Movement::expense(dec!(100), p("2024-02"))
            .on_account(visible.id)
            .paid_by(admin),
        Movement::expense(dec!(200), p("2024-02"))
            .on_card(card)
            .paid_by(admin),
        Movement::expense(dec!(50), p("2024-01"))
            .on_card(card)
            .paid_by(admin),
        Movement::transfer(dec!(-300), p("2024-02"))
            .on_account(visible.id)
            .paid_by(admin),
        Movement::expense(dec!(999), p("2024-02"))
            .on_account(visible.id)
            .paid_by(admin)
            .with_note("Invoice payment 2024-01"),
        Movement::expense(dec!(1000), p("2024-02"))
            .on_account(visible.id)
            .paid_by(PayerRef::shared(Uuid::new_v4())),
        Movement::expense(dec!(70), p("2024-02"))
            .on_account(hidden.id)
            .paid_by(admin),
    ];

    let engine = engine_on(d(2024, 2, 15));
    engine.store().insert_account(USER, visible).expect("account");
    engine.store().insert_account(USER, hidden).expect("account");
    engine
        .store()
        .insert_movements(USER, movements)
        .expect("movements");

    let metrics = engine.card_metrics(USER, p("2024-02")).expect("metrics");
    assert_eq!(metrics.previous_period, p("2024-01"));
    assert_eq!(metrics.income.current, dec!(3000));
    assert_eq!(metrics.income.previous, Decimal::ZERO);
    assert_eq!(metrics.expense.current, dec!(300));
    assert_eq!(metrics.expense.previous, dec!(50));
    assert_eq!(metrics.card_spend.current, dec!(200));
    assert_eq!(metrics.card_spend.previous, dec!(50));
    // 1000 + 3000 - 100 - 300 - 999; the invoice payment is real cash out.
    assert_eq!(metrics.balance.current, dec!(2601));
    assert_eq!(metrics.balance.previous, dec!(1000));

    let snapshot = engine.accounts_snapshot(USER, p("2024-02")).expect("snapshot");
    assert_eq!(metrics.balance.current, snapshot.total_projected);
}

#[test]
fn card_metrics_count_each_unreadable_row_once() {
    let admin = PayerRef::admin(Uuid::new_v4());
    let mut account = Account::new(Decimal::ZERO);
    account.initial_balance = None;
    let mut lost_income = Movement::income(dec!(1), p("2024-02"))
        .on_account(account.id)
        .paid_by(admin);
    lost_income.amount = None;
    let mut lost_expense = Movement::expense(dec!(1), p("2024-01"))
        .on_account(account.id)
        .paid_by(admin)
        .settled();
    lost_expense.amount = None;
    let movements = vec![
        lost_income,
        lost_expense,
        Movement::income(dec!(40), p("2024-02"))
            .on_account(account.id)
            .paid_by(admin),
    ];

    let config = EngineConfig::default();
    let metrics = BalanceAggregator::new(&config).card_metrics(
        &[account],
        &movements,
        p("2024-02"),
        d(2024, 2, 15),
    );
    assert_eq!(metrics.skipped_rows, 3);
    assert_eq!(metrics.income.current, dec!(40));
    assert_eq!(metrics.balance.current, dec!(40));
    assert_eq!(metrics.balance.previous, Decimal::ZERO);
}
