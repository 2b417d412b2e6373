use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::invoke;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::custody;
use crate::hire::{settle_escrow, withdraw_escrow_to_lender};
use crate::interest::loan_repayment_amount;
use crate::state::{
    Hire, HireState, InstrumentKind, InstrumentRegistry, ListingsError, Loan, LoanState,
};

#[derive(Accounts)]
#[instruction(amount: u64, basis_points: u32, duration: i64)]
pub struct InitLoan<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(
        mut,
        constraint = deposit_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init,
        payer = borrower,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        space = Loan::space(),
        bump,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        init_if_needed,
        payer = borrower,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
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

pub fn handle_init_loan(
    ctx: Context<InitLoan>,
    amount: u64,
    basis_points: u32,
    duration: i64,
) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let registry = &mut ctx.accounts.registry;

    // the asset must be in the borrower's own deposit account for a plain
    // listing; collateral already hired out goes through init_loan_with_hire
    require!(!registry.flags.hire, ListingsError::InvalidState);
    registry.set_flag(InstrumentKind::Loan, true)?;
    registry.mint = ctx.accounts.mint.key();
    registry.authority = ctx.accounts.borrower.key();
    registry.bump = ctx.bumps.registry;

    loan.state = LoanState::Listed;
    loan.amount = amount;
    loan.borrower = ctx.accounts.borrower.key();
    loan.lender = Pubkey::default();
    loan.basis_points = basis_points;
    loan.duration = duration;
    loan.start_date = 0;
    loan.mint = ctx.accounts.mint.key();
    loan.bump = ctx.bumps.loan;

    custody::acquire_custody(
        registry,
        ctx.accounts.token_program.to_account_info(),
        &ctx.accounts.deposit_token_account,
        ctx.accounts.borrower.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(LoanListed {
        loan: loan.key(),
        mint: loan.mint,
        borrower: loan.borrower,
        amount,
        basis_points,
        duration,
    });

    Ok(())
}

#[derive(Accounts)]
#[instruction(amount: u64, basis_points: u32, duration: i64)]
pub struct InitLoanWithHire<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(
        init,
        payer = borrower,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        space = Loan::space(),
        bump,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    #[account(
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = hire.bump,
        constraint = hire.state == HireState::Hired @ ListingsError::InvalidState,
        constraint = hire.lender == borrower.key() @ ListingsError::Unauthorized,
        constraint = hire.borrower == Some(hire_borrower.key()) @ ListingsError::Unauthorized,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: validated against the hire record
    pub hire_borrower: AccountInfo<'info>,
    #[account(
        constraint = hire_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = hire_borrower,
    )]
    pub hire_token_account: Box<Account<'info, TokenAccount>>,
    #[account(constraint = mint.supply == 1 @ ListingsError::InvalidMint)]
    pub mint: Box<Account<'info, Mint>>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub rent: Sysvar<'info, Rent>,
}

/// Lists a loan against an asset that is currently hired out. Custody is
/// already held through the hire, so no token account changes hands here.
pub fn handle_init_loan_with_hire(
    ctx: Context<InitLoanWithHire>,
    amount: u64,
    basis_points: u32,
    duration: i64,
) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let registry = &mut ctx.accounts.registry;

    require!(registry.flags.hire, ListingsError::InvalidState);
    registry.set_flag(InstrumentKind::Loan, true)?;

    loan.state = LoanState::Listed;
    loan.amount = amount;
    loan.borrower = ctx.accounts.borrower.key();
    loan.lender = Pubkey::default();
    loan.basis_points = basis_points;
    loan.duration = duration;
    loan.start_date = 0;
    loan.mint = ctx.accounts.mint.key();
    loan.bump = ctx.bumps.loan;

    emit!(LoanListed {
        loan: loan.key(),
        mint: loan.mint,
        borrower: loan.borrower,
        amount,
        basis_points,
        duration,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct GiveLoan<'info> {
    /// CHECK: constrained on the loan account
    #[account(mut)]
    pub borrower: AccountInfo<'info>,
    #[account(mut)]
    pub lender: Signer<'info>,
    #[account(
        mut,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = mint,
        has_one = borrower,
        constraint = loan.borrower != lender.key() @ ListingsError::Unauthorized,
        constraint = loan.state == LoanState::Listed @ ListingsError::InvalidState,
    )]
    pub loan: Box<Account<'info, Loan>>,
    pub mint: Box<Account<'info, Mint>>,
    pub system_program: Program<'info, System>,
}

pub fn handle_give_loan(ctx: Context<GiveLoan>) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    loan.activate(ctx.accounts.lender.key(), unix_timestamp)?;
    msg!(
        "Loan of {} lamports active at {} bps",
        loan.amount,
        loan.basis_points
    );

    invoke(
        &anchor_lang::solana_program::system_instruction::transfer(
            &loan.lender,
            &loan.borrower,
            loan.amount,
        ),
        &[
            ctx.accounts.lender.to_account_info(),
            ctx.accounts.borrower.to_account_info(),
        ],
    )?;

    emit!(LoanGiven {
        loan: loan.key(),
        lender: loan.lender,
        start_date: loan.start_date,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct RepayLoan<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    /// CHECK: constrained on the loan account
    #[account(mut)]
    pub lender: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = borrower,
        has_one = lender,
        has_one = mint,
        constraint = loan.state == LoanState::Active @ ListingsError::InvalidState,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
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

pub fn handle_repay_loan(ctx: Context<RepayLoan>) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    let amount_due = loan_repayment_amount(
        loan.amount,
        loan.basis_points,
        loan.start_date,
        unix_timestamp,
    )?;

    loan.mark_repaid()?;
    registry.set_flag(InstrumentKind::Loan, false)?;
    msg!("Repaying {} lamports", amount_due);

    invoke(
        &anchor_lang::solana_program::system_instruction::transfer(
            &loan.borrower,
            &loan.lender,
            amount_due,
        ),
        &[
            ctx.accounts.borrower.to_account_info(),
            ctx.accounts.lender.to_account_info(),
        ],
    )?;

    // the asset stays locked while a hire is still running
    if !registry.flags.hire {
        custody::release_custody(
            registry,
            ctx.accounts.token_program.to_account_info(),
            &ctx.accounts.deposit_token_account,
            ctx.accounts.borrower.to_account_info(),
            ctx.accounts.mint.to_account_info(),
            ctx.accounts.edition.to_account_info(),
            ctx.accounts.metadata_program.to_account_info(),
        )?;
    }

    emit!(LoanRepaid {
        loan: loan.key(),
        amount_due,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct Repossess<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    /// CHECK: constrained on the loan account
    #[account(mut)]
    pub borrower: AccountInfo<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub lender_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = borrower,
        has_one = lender,
        has_one = mint,
        constraint = loan.state == LoanState::Active @ ListingsError::InvalidState,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = registry.bump,
        constraint = !registry.flags.hire @ ListingsError::InvalidState,
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

pub fn handle_repossess(ctx: Context<Repossess>) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    loan.mark_defaulted(unix_timestamp)?;
    registry.set_flag(InstrumentKind::Loan, false)?;
    msg!("Loan overdue, repossessing collateral");

    custody::thaw_and_transfer_from_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.deposit_token_account.to_account_info(),
        ctx.accounts.lender_token_account.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(LoanRepossessed {
        loan: loan.key(),
        mint: loan.mint,
        lender: loan.lender,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct RepossessWithHire<'info> {
    #[account(mut)]
    pub lender: Signer<'info>,
    /// CHECK: constrained on the loan account; also the hire's lender
    #[account(mut)]
    pub borrower: AccountInfo<'info>,
    /// CHECK: validated against the hire record
    #[account(mut)]
    pub hire_borrower: AccountInfo<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = lender,
    )]
    pub lender_token_account: Box<Account<'info, TokenAccount>>,
    /// The account currently holding the asset under hire custody
    #[account(
        mut,
        constraint = token_account.mint == mint.key() @ ListingsError::InvalidMint,
        constraint = token_account.amount == 1 @ ListingsError::InsufficientBalance,
    )]
    pub token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = borrower,
        has_one = lender,
        has_one = mint,
        constraint = loan.state == LoanState::Active @ ListingsError::InvalidState,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        mut,
        seeds = [
            Hire::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = hire.bump,
        has_one = mint,
        constraint = hire.lender == borrower.key() @ ListingsError::Unauthorized,
        close = borrower,
    )]
    pub hire: Box<Account<'info, Hire>>,
    /// CHECK: constrained by seeds
    #[account(
        mut,
        seeds = [
            Hire::ESCROW_PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump,
    )]
    pub hire_escrow: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = registry.bump,
        constraint = registry.flags.loan && registry.flags.hire @ ListingsError::InvalidState,
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

/// Compound default path for collateral that is rented out: the overdue
/// loan defaults, the hire terminates with its escrow settled, and the
/// asset moves to the loan's lender. All of it commits together or the
/// whole transaction aborts.
pub fn handle_repossess_with_hire(ctx: Context<RepossessWithHire>) -> Result<()> {
    let loan = &mut ctx.accounts.loan;
    let hire = &mut ctx.accounts.hire;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    loan.mark_defaulted(unix_timestamp)?;
    registry.set_flag(InstrumentKind::Loan, false)?;
    registry.set_flag(InstrumentKind::Hire, false)?;
    msg!("Loan overdue, repossessing hired collateral");

    if hire.state == HireState::Hired {
        if let Some(renter) = hire.borrower {
            require_keys_eq!(
                renter,
                ctx.accounts.hire_borrower.key(),
                ListingsError::Unauthorized
            );
            settle_escrow(
                hire,
                &ctx.accounts.hire_escrow,
                ctx.bumps.hire_escrow,
                &ctx.accounts.borrower,
                Some(&ctx.accounts.hire_borrower),
                unix_timestamp,
            )?;
        }
    } else if hire.escrow_balance > 0 {
        withdraw_escrow_to_lender(
            hire,
            &ctx.accounts.hire_escrow,
            ctx.bumps.hire_escrow,
            &ctx.accounts.borrower,
            unix_timestamp,
        )?;
    }

    custody::thaw_and_transfer_from_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.token_account.to_account_info(),
        ctx.accounts.lender_token_account.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(LoanRepossessed {
        loan: loan.key(),
        mint: loan.mint,
        lender: loan.lender,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct CloseLoan<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = borrower,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            Loan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = borrower,
        has_one = mint,
        close = borrower,
    )]
    pub loan: Box<Account<'info, Loan>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
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

pub fn handle_close_loan(ctx: Context<CloseLoan>) -> Result<()> {
    let loan = &ctx.accounts.loan;
    let registry = &mut ctx.accounts.registry;

    loan.assert_closable()?;
    registry.set_flag(InstrumentKind::Loan, false)?;

    emit!(LoanClosed { loan: loan.key() });

    // after a repossession the deposit account is empty and a hire keeps
    // custody for itself
    if registry.flags.hire || ctx.accounts.deposit_token_account.amount == 0 {
        return Ok(());
    }

    custody::release_custody(
        registry,
        ctx.accounts.token_program.to_account_info(),
        &ctx.accounts.deposit_token_account,
        ctx.accounts.borrower.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    Ok(())
}

#[event]
pub struct LoanListed {
    pub loan: Pubkey,
    pub mint: Pubkey,
    pub borrower: Pubkey,
    pub amount: u64,
    pub basis_points: u32,
    pub duration: i64,
}

#[event]
pub struct LoanGiven {
    pub loan: Pubkey,
    pub lender: Pubkey,
    pub start_date: i64,
}

#[event]
pub struct LoanRepaid {
    pub loan: Pubkey,
    pub amount_due: u64,
}

#[event]
pub struct LoanRepossessed {
    pub loan: Pubkey,
    pub mint: Pubkey,
    pub lender: Pubkey,
}

#[event]
pub struct LoanClosed {
    pub loan: Pubkey,
}
