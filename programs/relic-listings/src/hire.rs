use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::{invoke, invoke_signed};
use anchor_lang::solana_program::system_instruction;
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::custody;
use crate::interest::{hire_fee, split_escrow_balance};
use crate::state::{
    Hire, HireState, InstrumentKind, InstrumentRegistry, ListingsError,
};

// Escrow plumbing. The escrow is a system-owned PDA holding prepaid fees;
// the program signs outgoing transfers with the escrow seeds. Fees accrue
// to the lender linearly over the current term, so at any point the balance
// splits into an earned share and a refundable share.

fn transfer_from_escrow<'info>(
    hire: &Hire,
    escrow: &AccountInfo<'info>,
    escrow_bump: u8,
    to: &AccountInfo<'info>,
    amount: u64,
) -> Result<()> {
    let mint = hire.mint;
    let lender = hire.lender;
    let signer_seeds: &[&[&[u8]]] = &[&[
        Hire::ESCROW_PREFIX,
        mint.as_ref(),
        lender.as_ref(),
        &[escrow_bump],
    ]];

    invoke_signed(
        &system_instruction::transfer(&escrow.key(), &to.key(), amount),
        &[escrow.clone(), to.clone()],
        signer_seeds,
    )?;

    Ok(())
}

/// Moves `days` worth of fees from the payer into the escrow.
pub fn pay_into_escrow<'info>(
    hire: &mut Account<'info, Hire>,
    escrow: &AccountInfo<'info>,
    payer: &AccountInfo<'info>,
    days: u16,
) -> Result<u64> {
    let fee = hire_fee(hire.amount, days)?;

    if fee > 0 {
        invoke(
            &system_instruction::transfer(&payer.key(), &escrow.key(), fee),
            &[payer.clone(), escrow.clone()],
        )?;
    }

    hire.escrow_balance = hire
        .escrow_balance
        .checked_add(fee)
        .ok_or(ListingsError::NumericalOverflow)?;

    Ok(fee)
}

/// Pays out the share of the escrow earned so far to the lender, leaving
/// the unearned remainder in place. Restarts the accrual window at `now`
/// so a later settlement does not pay the same period twice.
pub fn withdraw_escrow_to_lender<'info>(
    hire: &mut Account<'info, Hire>,
    escrow: &AccountInfo<'info>,
    escrow_bump: u8,
    lender: &AccountInfo<'info>,
    unix_timestamp: i64,
) -> Result<u64> {
    if hire.escrow_balance == 0 {
        return Ok(0);
    }

    let (earned, _) = match (hire.current_start, hire.current_expiry) {
        (Some(start), Some(expiry)) => {
            split_escrow_balance(hire.escrow_balance, start, expiry, unix_timestamp)?
        }
        // no running term, nothing left to refund
        _ => (hire.escrow_balance, 0),
    };

    if earned > 0 {
        transfer_from_escrow(hire, escrow, escrow_bump, lender, earned)?;
        hire.escrow_balance = hire
            .escrow_balance
            .checked_sub(earned)
            .ok_or(ListingsError::NumericalOverflow)?;

        if hire.state == HireState::Hired {
            hire.current_start = Some(unix_timestamp);
        }
    }

    Ok(earned)
}

/// Drains the escrow completely: earned share to the lender, unearned share
/// back to the renter. Nothing is forfeited. A refund with no renter account
/// on hand is an error rather than a silent redirect.
pub fn settle_escrow<'info>(
    hire: &mut Account<'info, Hire>,
    escrow: &AccountInfo<'info>,
    escrow_bump: u8,
    lender: &AccountInfo<'info>,
    renter: Option<&AccountInfo<'info>>,
    unix_timestamp: i64,
) -> Result<()> {
    if hire.escrow_balance == 0 {
        return Ok(());
    }

    let (earned, refund) = match (hire.current_start, hire.current_expiry) {
        (Some(start), Some(expiry)) => {
            split_escrow_balance(hire.escrow_balance, start, expiry, unix_timestamp)?
        }
        _ => (hire.escrow_balance, 0),
    };

    if earned > 0 {
        transfer_from_escrow(hire, escrow, escrow_bump, lender, earned)?;
    }

    if refund > 0 {
        let renter = renter.ok_or(ListingsError::BorrowerNotSpecified)?;
        transfer_from_escrow(hire, escrow, escrow_bump, renter, refund)?;
    }

    hire.escrow_balance = 0;

    Ok(())
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone)]
pub struct HireArgs {
    pub amount: u64,
    pub expiry: i64,
    pub borrower: Option<Pubkey>,
}

#[derive(Accounts)]
pub struct InitHire<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    #[account(
        mut,
        constraint = deposit_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init,
        payer = lender,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        space = Hire::space(),
        bump,
    )]
    pub hire: Box<Account<'info, Hire>>,
    #[account(
        init_if_needed,
        payer = lender,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        space = InstrumentRegistry::space(),
        bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    #[account(constraint = mint.supply == 1 @ ListingsError::InvalidMint)]
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub rent: Sysvar<'info, Rent>,
}

pub fn handle_init_hire(ctx: Context<InitHire>, args: HireArgs) -> Result<()> {
    let hire = &mut ctx.accounts.hire;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    Hire::assert_valid_listing(args.amount, args.borrower, args.expiry, unix_timestamp)?;

    registry.set_flag(InstrumentKind::Hire, true)?;
    registry.mint = ctx.accounts.mint.key();
    registry.authority = ctx.accounts.lender.key();
    registry.bump = ctx.bumps.registry;

    hire.state = HireState::Listed;
    hire.amount = args.amount;
    hire.lender = ctx.accounts.lender.key();
    hire.borrower = args.borrower;
    hire.expiry = args.expiry;
    hire.current_start = None;
    hire.current_expiry = None;
    hire.escrow_balance = 0;
    hire.mint = ctx.accounts.mint.key();
    hire.bump = ctx.bumps.hire;

    custody::acquire_custody(
        registry,
        ctx.accounts.token_program.to_account_info(),
        &ctx.accounts.deposit_token_account,
        ctx.accounts.lender.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(HireListed {
        hire: hire.key(),
        mint: hire.mint,
        lender: hire.lender,
        amount: hire.amount,
        expiry: hire.expiry,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct TakeHire<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    /// CHECK: constrained on the hire account
    #[account(mut)]
    pub lender: AccountInfo<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init_if_needed,
        payer = borrower,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub hire_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        has_one = lender,
        constraint = hire.state == HireState::Listed @ ListingsError::InvalidState,
        constraint = hire.lender != borrower.key() @ ListingsError::Unauthorized,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
    pub rent: Sysvar<'info, Rent>,
}

pub fn handle_take_hire(ctx: Context<TakeHire>, days: u16) -> Result<()> {
    let hire = &mut ctx.accounts.hire;
    let registry = &ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    // residue from a previous term belongs to the lender, flush it before
    // the new accrual window opens
    withdraw_escrow_to_lender(
        hire,
        &ctx.accounts.hire_escrow,
        ctx.bumps.hire_escrow,
        &ctx.accounts.lender,
        unix_timestamp,
    )?;

    hire.take(ctx.accounts.borrower.key(), days, unix_timestamp)?;
    msg!("Hired for {} days", days);

    let fee = pay_into_escrow(
        hire,
        &ctx.accounts.hire_escrow,
        &ctx.accounts.borrower.to_account_info(),
        days,
    )?;

    // hand the asset to the renter and immediately re-lock it there
    custody::thaw_and_transfer_from_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.deposit_token_account.to_account_info(),
        ctx.accounts.hire_token_account.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    custody::delegate_and_freeze_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.hire_token_account.to_account_info(),
        ctx.accounts.borrower.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(HireTaken {
        hire: hire.key(),
        borrower: ctx.accounts.borrower.key(),
        days,
        fee,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct ExtendHire<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    /// CHECK: constrained on the hire account
    #[account(mut)]
    pub lender: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        has_one = lender,
        constraint = hire.state == HireState::Hired @ ListingsError::InvalidState,
        constraint = hire.borrower == Some(borrower.key()) @ ListingsError::Unauthorized,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    pub mint: Box<Account<'info, Mint>>,
    pub system_program: Program<'info, System>,
}

pub fn handle_extend_hire(ctx: Context<ExtendHire>, days: u16) -> Result<()> {
    let hire = &mut ctx.accounts.hire;

    hire.extend(days)?;

    let fee = pay_into_escrow(
        hire,
        &ctx.accounts.hire_escrow,
        &ctx.accounts.borrower.to_account_info(),
        days,
    )?;

    emit!(HireExtended {
        hire: hire.key(),
        days,
        fee,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct RecoverHire<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    /// CHECK: constrained on the hire account
    #[account(mut)]
    pub borrower: AccountInfo<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        constraint = hire_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub hire_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        has_one = lender,
        constraint = hire.state == HireState::Hired @ ListingsError::InvalidState,
        constraint = hire.borrower == Some(borrower.key()) @ ListingsError::Unauthorized,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
}

pub fn handle_recover_hire(ctx: Context<RecoverHire>) -> Result<()> {
    let hire = &mut ctx.accounts.hire;
    let registry = &ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    // recover only runs after the term lapsed, so the whole balance is earned
    hire.recover(unix_timestamp)?;
    msg!("Hire term lapsed, returning asset to the lender");
    settle_escrow(
        hire,
        &ctx.accounts.hire_escrow,
        ctx.bumps.hire_escrow,
        &ctx.accounts.lender.to_account_info(),
        Some(&ctx.accounts.borrower),
        unix_timestamp,
    )?;

    custody::thaw_and_transfer_from_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.hire_token_account.to_account_info(),
        ctx.accounts.deposit_token_account.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    // the listing is live again, keep the asset locked with the lender
    custody::delegate_and_freeze_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.deposit_token_account.to_account_info(),
        ctx.accounts.lender.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(HireRecovered {
        hire: hire.key(),
        lender: hire.lender,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct WithdrawFromHireEscrow<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        has_one = lender,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    pub mint: Box<Account<'info, Mint>>,
    pub system_program: Program<'info, System>,
}

pub fn handle_withdraw_from_hire_escrow(ctx: Context<WithdrawFromHireEscrow>) -> Result<()> {
    let hire = &mut ctx.accounts.hire;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    let amount = withdraw_escrow_to_lender(
        hire,
        &ctx.accounts.hire_escrow,
        ctx.bumps.hire_escrow,
        &ctx.accounts.lender.to_account_info(),
        unix_timestamp,
    )?;

    emit!(HireWithdrawn {
        hire: hire.key(),
        amount,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct CloseHire<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        has_one = lender,
        close = lender,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            lender.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
}

pub fn handle_close_hire(ctx: Context<CloseHire>) -> Result<()> {
    let hire = &mut ctx.accounts.hire;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    hire.assert_closable()?;

    // residue from a lapsed term that was never withdrawn
    settle_escrow(
        hire,
        &ctx.accounts.hire_escrow,
        ctx.bumps.hire_escrow,
        &ctx.accounts.lender.to_account_info(),
        None,
        unix_timestamp,
    )?;

    registry.set_flag(InstrumentKind::Hire, false)?;

    emit!(HireClosed { hire: hire.key() });

    if registry.flags.loan {
        return Ok(());
    }

    custody::release_custody(
        registry,
        ctx.accounts.token_program.to_account_info(),
        &ctx.accounts.deposit_token_account,
        ctx.accounts.lender.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    Ok(())
}

#[event]
pub struct HireListed {
    pub hire: Pubkey,
    pub mint: Pubkey,
    pub lender: Pubkey,
    pub amount: u64,
    pub expiry: i64,
}

#[event]
pub struct HireTaken {
    pub hire: Pubkey,
    pub borrower: Pubkey,
    pub days: u16,
    pub fee: u64,
}

#[event]
pub struct HireExtended {
    pub hire: Pubkey,
    pub days: u16,
    pub fee: u64,
}

#[event]
pub struct HireRecovered {
    pub hire: Pubkey,
    pub lender: Pubkey,
}

#[event]
pub struct HireWithdrawn {
    pub hire: Pubkey,
    pub amount: u64,
}

#[event]
pub struct HireClosed {
    pub hire: Pubkey,
}
