//! CLI command implementations.

use crate::AppContext;
use nutsack_rpc::{normalize_url, MintRpc};
use nutsack_types::constants::MSAT_PER_SAT;
use nutsack_types::{format_balance, invoice_amount_msat, proofs_amount};
use nutsack_wallet::{
    load_mint_snapshot, select::select, SelectionOptions, SelectionStrategy, SqliteStore,
    WalletState, WalletStore,
};

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn open_store(ctx: &AppContext) -> std::result::Result<SqliteStore, Box<dyn std::error::Error>> {
    if !ctx.state_path.exists() {
        return Err(format!(
            "state database not found: {}\nSpecify one with --state",
            ctx.state_path.display()
        )
        .into());
    }
    log::debug!("opening state database {}", ctx.state_path.display());
    Ok(SqliteStore::open(&ctx.state_path)?)
}

/// Resolve the identity to operate on.
fn identity(ctx: &AppContext, store: &SqliteStore) -> std::result::Result<String, Box<dyn std::error::Error>> {
    if let Some(ref id) = ctx.identity {
        return Ok(id.clone());
    }
    let mut ids = store.identities()?;
    match ids.len() {
        0 => Err("state database holds no wallets".into()),
        1 => Ok(ids.remove(0)),
        n => Err(format!("state database holds {} wallets, pick one with --identity", n).into()),
    }
}

fn load_state(
    ctx: &AppContext,
) -> std::result::Result<(SqliteStore, String, WalletState), Box<dyn std::error::Error>> {
    let store = open_store(ctx)?;
    let id = identity(ctx, &store)?;
    let state = store
        .load(&id)?
        .ok_or_else(|| format!("no wallet stored for identity {}", id))?;
    Ok((store, id, state))
}

fn short(id: &str) -> String {
    if id.len() > 16 {
        format!("{}...", &id[..16])
    } else {
        id.to_string()
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub fn list_identities(ctx: &AppContext) -> Result {
    let store = open_store(ctx)?;
    let ids = store.identities()?;
    if ids.is_empty() {
        println!("No wallets stored.");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

pub fn show_balance(ctx: &AppContext) -> Result {
    let (_, id, state) = load_state(ctx)?;
    let balances = state.ledger.balances();

    println!("Wallet {}", short(&id));
    if balances.is_empty() {
        println!("No mints configured.");
        return Ok(());
    }

    let active = state.active_mint();
    println!("{:<2} {:<48} {:>16}", "", "Mint", "Balance");
    println!("{}", "-".repeat(68));
    for (mint, sats) in &balances {
        let marker = if active.as_deref() == Some(mint.as_str()) { "*" } else { "" };
        println!("{:<2} {:<48} {:>16}", marker, mint, format_balance(*sats));
    }
    println!();
    println!("Total: {}", format_balance(state.ledger.total_balance()));
    if !state.pending_tokens.is_empty() {
        println!(
            "{} token event(s) not yet published",
            state.pending_tokens.len()
        );
    }
    for (quote, melt) in &state.pending_melts {
        println!(
            "Melt {} pending at {}: {} locked",
            short(quote),
            melt.mint,
            format_balance(proofs_amount(&melt.proofs))
        );
    }

    Ok(())
}

pub fn show_history(ctx: &AppContext, limit: usize) -> Result {
    let (_, _, state) = load_state(ctx)?;
    let entries = state.history.newest_first();

    if entries.is_empty() {
        println!("No history entries.");
        return Ok(());
    }

    println!("Showing {}/{} entries:", entries.len().min(limit), entries.len());
    println!();
    println!("{:<12} {:<4} {:>16} Event", "Time", "Dir", "Amount");
    println!("{}", "-".repeat(60));

    for entry in entries.iter().take(limit) {
        let event = match entry.id {
            Some(ref id) => short(id),
            None => "(unpublished)".to_string(),
        };
        println!(
            "{:<12} {:<4} {:>16} {}",
            entry.timestamp,
            entry.direction,
            format_balance(entry.amount),
            event,
        );
    }

    Ok(())
}

pub fn show_proofs(ctx: &AppContext, mint: Option<&str>) -> Result {
    let (_, _, state) = load_state(ctx)?;
    let mint = mint.map(normalize_url).transpose()?;

    println!("{:>10} {:<18} {:<12} {:<20} Origin", "Amount", "Keyset", "Status", "Secret");
    println!("{}", "-".repeat(80));
    let mut count = 0;
    for held in state.ledger.held() {
        if mint.as_deref().map_or(false, |m| m != held.mint) {
            continue;
        }
        println!(
            "{:>10} {:<18} {:<12} {:<20} {}",
            held.proof.amount,
            held.proof.id,
            state.ledger.keyset_status(held),
            short(&held.proof.secret),
            short(&held.origin),
        );
        count += 1;
    }
    println!();
    println!("{} proof(s)", count);

    Ok(())
}

pub fn show_mints(ctx: &AppContext) -> Result {
    let (_, _, state) = load_state(ctx)?;

    for url in state.mint_urls() {
        println!("{}", url);
        match state.ledger.mint(&url).and_then(|m| m.keysets.as_ref()) {
            None => println!("  keysets not loaded"),
            Some(keysets) => {
                for ks in keysets {
                    println!(
                        "  {:<18} {:<6} {:<8} fee {} ppk",
                        ks.id,
                        ks.unit,
                        if ks.active { "active" } else { "inactive" },
                        ks.input_fee_ppk.unwrap_or(0)
                    );
                }
            }
        }
    }

    Ok(())
}

pub async fn mint_info(url: &str) -> Result {
    let mint = MintRpc::new(url)?;
    println!("Connecting to {} ...", mint.url());

    let info = mint.get_info().await?;
    println!("Name:        {}", info.name.as_deref().unwrap_or("-"));
    println!("Version:     {}", info.version.as_deref().unwrap_or("-"));
    println!("Pubkey:      {}", info.pubkey.as_deref().unwrap_or("-"));
    if let Some(ref motd) = info.motd {
        println!("MOTD:        {}", motd);
    }
    let nuts: Vec<&str> = info.nuts.keys().map(String::as_str).collect();
    println!("NUTs:        {}", nuts.join(", "));

    Ok(())
}

pub async fn refresh_keysets(ctx: &AppContext, url: &str) -> Result {
    let (store, id, mut state) = load_state(ctx)?;
    let url = normalize_url(url)?;
    if !state.ledger.has_mint(&url) {
        return Err(format!("{} is not one of this wallet's mints", url).into());
    }

    let mint = MintRpc::new(&url)?;
    let snapshot = load_mint_snapshot(&mint).await?;
    let before = state.ledger.total_balance();

    if let Some(info) = snapshot.info {
        state.ledger.set_mint_info(&url, serde_json::to_value(info)?)?;
    }
    let count = snapshot.keysets.len();
    state.ledger.set_keysets(&url, snapshot.keysets)?;
    for (keyset_id, keys) in snapshot.keys {
        state.ledger.set_keys(&url, &keyset_id, keys)?;
    }
    store.save(&id, &state)?;

    println!("Stored {} keysets for {}", count, url);
    let after = state.ledger.total_balance();
    if after != before {
        println!(
            "Spendable balance changed: {} -> {}",
            format_balance(before),
            format_balance(after)
        );
    }

    Ok(())
}

pub async fn quote_status(url: &str, quote: &str, melt: bool) -> Result {
    let mint = MintRpc::new(url)?;

    if melt {
        let q = mint.check_melt_quote(quote).await?;
        println!("Melt quote {}", q.quote);
        println!("  State:       {}", q.state);
        println!("  Amount:      {}", format_balance(q.amount));
        println!("  Fee reserve: {}", format_balance(q.fee_reserve));
    } else {
        let q = mint.check_mint_quote(quote).await?;
        println!("Mint quote {}", q.quote);
        println!("  State:   {}", q.state);
        println!("  Amount:  {}", format_balance(q.amount));
        println!("  Invoice: {}", q.request);
    }

    Ok(())
}

pub fn decode_invoice(invoice: &str) -> Result {
    match invoice_amount_msat(invoice)? {
        Some(msat) => {
            println!("Amount: {} ({} msat)", format_balance(msat / MSAT_PER_SAT), msat);
        }
        None => println!("Amount: none (payer chooses)"),
    }
    Ok(())
}

pub fn select_proofs(
    ctx: &AppContext,
    url: &str,
    amount: u64,
    fee_reserve: u64,
    strategy: SelectionStrategy,
) -> Result {
    let (_, _, state) = load_state(ctx)?;
    let url = normalize_url(url)?;
    let options = SelectionOptions {
        strategy,
        ..Default::default()
    };

    let selection = select(&state.ledger, &url, amount, fee_reserve, &options)?;
    println!(
        "Selected {} proof(s), total {}",
        selection.spend.len(),
        format_balance(selection.total)
    );
    for proof in &selection.spend {
        println!("  {:>10} {}", proof.amount, short(&proof.secret));
    }
    println!(
        "Change: {} as {:?}",
        format_balance(selection.change_needed),
        selection.change_denominations()
    );

    Ok(())
}
