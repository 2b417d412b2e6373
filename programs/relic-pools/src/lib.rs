// Summary: Anchor program implementing collection-scoped funding pools.
// A pool posts a fixed floor price and rate for any NFT with verified
// membership in its collection; borrowing moves the NFT into a program-held
// escrow token account and pays the floor price straight out of the pool's
// lamports. Repayment returns principal plus pro-rata interest to the pool
// and the NFT to the borrower.

use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::invoke;
use anchor_lang::solana_program::system_instruction;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};
use mpl_token_metadata::accounts::Metadata;

pub mod state;
use state::*;

declare_id!("gHR5K5YWRDouD6ZiFM3QeGoNYxkLRtvXLpSokk5dxAE");

pub const SECONDS_PER_YEAR: i64 = 31_536_000;

/// Interest accrued on `amount` at an annualized `basis_points` rate since
/// `start_date`. Integer arithmetic, truncating, 365-day year.
fn pro_rata_interest(
    amount: u64,
    basis_points: u32,
    start_date: i64,
    unix_timestamp: i64,
) -> Result<u64> {
    let elapsed = unix_timestamp.saturating_sub(start_date).max(0) as u128;
    let interest = (amount as u128)
        .checked_mul(basis_points as u128)
        .ok_or(PoolError::NumericalOverflow)?
        .checked_mul(elapsed)
        .ok_or(PoolError::NumericalOverflow)?
        .checked_div(10_000)
        .ok_or(PoolError::NumericalOverflow)?
        .checked_div(SECONDS_PER_YEAR as u128)
        .ok_or(PoolError::NumericalOverflow)?;
    u64::try_from(interest).map_err(|_| PoolError::NumericalOverflow.into())
}

/// Lamports the pool can pay out without dipping below its own rent.
fn pool_available_balance(pool: &Account<Pool>) -> Result<u64> {
    let rent_minimum = Rent::get()?.minimum_balance(Pool::space());
    Ok(pool
        .to_account_info()
        .lamports()
        .saturating_sub(rent_minimum))
}

/// Verifies that `metadata_info` is the metadata PDA for the deposited mint
/// and proves verified membership in the pool's collection.
fn assert_collection_membership<'info>(
    metadata_info: &AccountInfo<'info>,
    token_account: &Account<'info, TokenAccount>,
    mint: Pubkey,
    pool: &Account<'info, Pool>,
) -> Result<()> {
    let (key, _) = Metadata::find_pda(&token_account.mint);

    if key != metadata_info.key() {
        return err!(PoolError::DerivedKeyInvalid);
    }

    if metadata_info.data_is_empty() {
        return err!(PoolError::MetadataDoesntExist);
    }

    let data = metadata_info.try_borrow_data()?;
    let metadata =
        Metadata::safe_deserialize(&data).map_err(|_| PoolError::MetadataDoesntExist)?;

    if metadata.mint != mint {
        return err!(PoolError::InvalidMint);
    }

    match metadata.collection {
        Some(collection) => {
            // an unverified collection field can be set by anyone
            if !collection.verified || collection.key != pool.collection {
                return err!(PoolError::InvalidCollection);
            }
        }
        None => {
            return err!(PoolError::CollectionUndefined);
        }
    }

    Ok(())
}

#[program]
pub mod relic_pools {
    use super::*;

    pub fn create_pool(ctx: Context<CreatePool>, options: PoolOptions) -> Result<()> {
        let pool = &mut ctx.accounts.pool;

        pool.authority = ctx.accounts.authority.key();
        pool.collection = ctx.accounts.collection.key();
        pool.floor_price = options.floor_price;
        pool.basis_points = options.basis_points;
        pool.bump = ctx.bumps.pool;

        emit!(PoolCreated {
            pool: pool.key(),
            authority: pool.authority,
            collection: pool.collection,
            floor_price: pool.floor_price,
            basis_points: pool.basis_points,
        });

        Ok(())
    }

    pub fn withdraw_from_pool(ctx: Context<WithdrawFromPool>, amount: u64) -> Result<()> {
        let pool = &ctx.accounts.pool;

        if amount > pool_available_balance(pool)? {
            return err!(PoolError::PoolInsufficientFunds);
        }

        // the pool PDA carries data, so lamports move by direct mutation
        // rather than a system transfer
        let pool_info = pool.to_account_info();
        let authority_info = ctx.accounts.authority.to_account_info();
        **pool_info.try_borrow_mut_lamports()? = pool_info
            .lamports()
            .checked_sub(amount)
            .ok_or(PoolError::PoolInsufficientFunds)?;
        **authority_info.try_borrow_mut_lamports()? = authority_info
            .lamports()
            .checked_add(amount)
            .ok_or(PoolError::NumericalOverflow)?;

        emit!(PoolWithdrawal {
            pool: pool.key(),
            amount,
        });

        Ok(())
    }

    pub fn borrow_from_pool(ctx: Context<BorrowFromPool>) -> Result<()> {
        let loan = &mut ctx.accounts.loan;
        let pool = &ctx.accounts.pool;
        let unix_timestamp = Clock::get()?.unix_timestamp;

        assert_collection_membership(
            &ctx.accounts.metadata.to_account_info(),
            &ctx.accounts.deposit_token_account,
            ctx.accounts.mint.key(),
            pool,
        )?;

        if pool_available_balance(pool)? < pool.floor_price {
            return err!(PoolError::PoolInsufficientFunds);
        }

        loan.state = PoolLoanState::Active;
        loan.amount = pool.floor_price;
        loan.basis_points = pool.basis_points;
        loan.borrower = ctx.accounts.borrower.key();
        loan.pool = pool.key();
        loan.mint = ctx.accounts.mint.key();
        loan.start_date = unix_timestamp;
        loan.bump = ctx.bumps.loan;
        loan.escrow_bump = ctx.bumps.escrow;
        msg!("Originating {} lamports at {} bps", loan.amount, loan.basis_points);

        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.deposit_token_account.to_account_info(),
                    to: ctx.accounts.escrow.to_account_info(),
                    authority: ctx.accounts.borrower.to_account_info(),
                },
            ),
            1,
        )?;

        let pool_info = pool.to_account_info();
        let borrower_info = ctx.accounts.borrower.to_account_info();
        **pool_info.try_borrow_mut_lamports()? = pool_info
            .lamports()
            .checked_sub(pool.floor_price)
            .ok_or(PoolError::PoolInsufficientFunds)?;
        **borrower_info.try_borrow_mut_lamports()? = borrower_info
            .lamports()
            .checked_add(pool.floor_price)
            .ok_or(PoolError::NumericalOverflow)?;

        emit!(PoolLoanOriginated {
            loan: loan.key(),
            pool: pool.key(),
            borrower: loan.borrower,
            mint: loan.mint,
            amount: loan.amount,
        });

        Ok(())
    }

    pub fn repay_pool_loan(ctx: Context<RepayPoolLoan>) -> Result<()> {
        let loan = &mut ctx.accounts.loan;
        let unix_timestamp = Clock::get()?.unix_timestamp;

        let interest = pro_rata_interest(
            loan.amount,
            loan.basis_points,
            loan.start_date,
            unix_timestamp,
        )?;
        let amount_due = loan
            .amount
            .checked_add(interest)
            .ok_or(PoolError::NumericalOverflow)?;

        loan.mark_repaid()?;
        msg!("Repaying {} lamports to the pool", amount_due);

        invoke(
            &system_instruction::transfer(
                &ctx.accounts.borrower.key(),
                &ctx.accounts.pool.key(),
                amount_due,
            ),
            &[
                ctx.accounts.borrower.to_account_info(),
                ctx.accounts.pool.to_account_info(),
            ],
        )?;

        let mint = ctx.accounts.mint.key();
        let signer_seeds: &[&[&[u8]]] = &[&[
            PoolLoan::ESCROW_PREFIX,
            mint.as_ref(),
            &[loan.escrow_bump],
        ]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.escrow.to_account_info(),
                    to: ctx.accounts.deposit_token_account.to_account_info(),
                    authority: ctx.accounts.escrow.to_account_info(),
                },
                signer_seeds,
            ),
            1,
        )?;

        emit!(PoolLoanRepaid {
            loan: loan.key(),
            amount_due,
        });

        Ok(())
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Copy, Clone)]
pub struct PoolOptions {
    pub floor_price: u64,
    pub basis_points: u32,
}

#[derive(Accounts)]
#[instruction(options: PoolOptions)]
pub struct CreatePool<'info> {
    #[account(mut)]
    pub authority: Signer<'info>,
    pub collection: Box<Account<'info, Mint>>,
    #[account(
        init,
        payer = authority,
        seeds = [
            Pool::PREFIX,
            authority.key().as_ref(),
            collection.key().as_ref(),
        ],
        space = Pool::space(),
        bump,
    )]
    pub pool: Box<Account<'info, Pool>>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub rent: Sysvar<'info, Rent>,
}

#[derive(Accounts)]
pub struct WithdrawFromPool<'info> {
    #[account(mut)]
    pub authority: Signer<'info>,
    #[account(mut, has_one = authority @ PoolError::InvalidState)]
    pub pool: Box<Account<'info, Pool>>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct BorrowFromPool<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(mut)]
    pub pool: Box<Account<'info, Pool>>,
    #[account(
        mut,
        constraint = deposit_token_account.owner == borrower.key() @ PoolError::InvalidState,
        constraint = deposit_token_account.mint == mint.key() @ PoolError::InvalidMint,
        constraint = deposit_token_account.amount == 1 @ PoolError::InvalidState,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init,
        payer = borrower,
        seeds = [
            PoolLoan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        space = PoolLoan::space(),
        bump,
    )]
    pub loan: Box<Account<'info, PoolLoan>>,
    /// Holds the collateral for the life of the loan
    #[account(
        init_if_needed,
        payer = borrower,
        seeds = [
            PoolLoan::ESCROW_PREFIX,
            mint.key().as_ref(),
        ],
        bump,
        token::mint = mint,
        token::authority = escrow,
    )]
    pub escrow: Box<Account<'info, TokenAccount>>,
    #[account(constraint = mint.supply == 1 @ PoolError::InvalidMint)]
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated against the mint's metadata pda
    pub metadata: UncheckedAccount<'info>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub rent: Sysvar<'info, Rent>,
}

#[derive(Accounts)]
pub struct RepayPoolLoan<'info> {
    #[account(mut)]
    pub borrower: Signer<'info>,
    #[account(
        mut,
        constraint = deposit_token_account.owner == borrower.key() @ PoolError::InvalidState,
        constraint = deposit_token_account.mint == mint.key() @ PoolError::InvalidMint,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            PoolLoan::ESCROW_PREFIX,
            mint.key().as_ref(),
        ],
        bump = loan.escrow_bump,
    )]
    pub escrow: Box<Account<'info, TokenAccount>>,
    #[account(mut)]
    pub pool: Box<Account<'info, Pool>>,
    #[account(
        mut,
        seeds = [
            PoolLoan::PREFIX,
            mint.key().as_ref(),
            borrower.key().as_ref(),
        ],
        bump = loan.bump,
        has_one = borrower,
        has_one = pool,
        has_one = mint,
        constraint = loan.state == PoolLoanState::Active @ PoolError::InvalidState,
        close = borrower,
    )]
    pub loan: Box<Account<'info, PoolLoan>>,
    pub mint: Box<Account<'info, Mint>>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
}

#[event]
pub struct PoolCreated {
    pub pool: Pubkey,
    pub authority: Pubkey,
    pub collection: Pubkey,
    pub floor_price: u64,
    pub basis_points: u32,
}

#[event]
pub struct PoolWithdrawal {
    pub pool: Pubkey,
    pub amount: u64,
}

#[event]
pub struct PoolLoanOriginated {
    pub loan: Pubkey,
    pub pool: Pubkey,
    pub borrower: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
}

#[event]
pub struct PoolLoanRepaid {
    pub loan: Pubkey,
    pub amount_due: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_interest_matches_annualized_rate() {
        assert_eq!(
            pro_rata_interest(1_000_000_000, 500, 0, SECONDS_PER_YEAR).unwrap(),
            50_000_000
        );
        assert_eq!(
            pro_rata_interest(1_000_000_000, 500, 0, SECONDS_PER_YEAR / 2).unwrap(),
            25_000_000
        );
        // before the start date nothing has accrued
        assert_eq!(pro_rata_interest(1_000_000_000, 500, 100, 50).unwrap(), 0);
    }
}
